//! Prompt templates
//!
//! Each prompt pins the JSON shape the caller parses with
//! [`parse_generated`](crate::services::parse_generated). The first line names the
//! task and stays stable.

use crate::models::{Location, ManualAttributes};
use crate::services::WeatherAverages;

const JSON_ONLY: &str = "Respond with JSON only, no commentary.";

fn push_field(lines: &mut Vec<String>, label: &str, value: Option<String>) {
    if let Some(value) = value.filter(|v| !v.trim().is_empty()) {
        lines.push(format!("- {}: {}", label, value.trim()));
    }
}

/// Conditions section for manual mode
pub fn manual_conditions(attributes: &ManualAttributes) -> String {
    let mut lines = Vec::new();
    push_field(&mut lines, "Soil type", attributes.soil_type.clone());
    push_field(&mut lines, "Climate", attributes.climate.clone());
    push_field(&mut lines, "Season", attributes.season.clone());
    push_field(&mut lines, "Temperature (°C)", attributes.temperature.map(|v| v.to_string()));
    push_field(&mut lines, "Humidity (%)", attributes.humidity.map(|v| v.to_string()));
    push_field(&mut lines, "Rainfall (mm/year)", attributes.rainfall.map(|v| v.to_string()));
    push_field(&mut lines, "Available space", attributes.space.clone());
    push_field(&mut lines, "Notes", attributes.notes.clone());
    lines.join("\n")
}

/// Conditions section for auto mode
pub fn weather_conditions(location: &Location, weather: &WeatherAverages, days: u32) -> String {
    let place = match &location.state {
        Some(state) if !state.trim().is_empty() => {
            format!("{}, {}, {}", location.city, state, location.country)
        }
        _ => format!("{}, {}", location.city, location.country),
    };

    format!(
        "- Location: {place}\n\
         - Average daily max temperature over {days} days (°C): {}\n\
         - Average daily min temperature (°C): {}\n\
         - Average relative humidity (%): {}\n\
         - Average daily rainfall (mm): {}\n\
         - Average max wind speed (km/h): {}\n\
         - Dominant wind direction: {}",
        weather.avg_max_temp,
        weather.avg_min_temp,
        weather.avg_humidity,
        weather.avg_rainfall,
        weather.avg_wind_speed,
        weather.dominant_wind_direction,
    )
}

/// Expected: `{"crops":[{"name":"...","scientificName":"..."}]}`
pub fn crop_identities(conditions: &str, has_image: bool) -> String {
    let image_hint = if has_image {
        "A photo of the garden is attached; take the visible space and light into account.\n"
    } else {
        ""
    };

    format!(
        "Suggest crops for the following growing conditions.\n\
         {image_hint}\
         Conditions:\n{conditions}\n\n\
         Return between 3 and 6 crops that grow well in these conditions.\n\
         {JSON_ONLY}\n\
         Shape: {{\"crops\":[{{\"name\":\"common name\",\"scientificName\":\"binomial name\"}}]}}"
    )
}

/// Expected: `{"description":"...","tags":["..."],"profile":{...}}`
pub fn crop_profile(name: &str, scientific_name: &str, conditions: &str) -> String {
    format!(
        "Describe the crop {name} ({scientific_name}).\n\
         It was suggested for these conditions:\n{conditions}\n\n\
         {JSON_ONLY}\n\
         Shape: {{\"description\":\"two sentences\",\"tags\":[\"short tags\"],\
         \"profile\":{{\"sunlight\":\"...\",\"water\":\"...\",\"soil\":\"...\",\
         \"season\":\"...\",\"daysToHarvest\":0,\"difficulty\":\"easy|medium|hard\"}}}}"
    )
}

/// Expected: a JSON object with the growing guide
pub fn crop_details(name: &str, scientific_name: &str) -> String {
    format!(
        "Write a detailed growing guide for {name} ({scientific_name}).\n\
         {JSON_ONLY}\n\
         Shape: {{\"planting\":\"...\",\"spacing\":\"...\",\"watering\":\"...\",\
         \"fertilizing\":\"...\",\"pests\":[\"...\"],\"harvesting\":\"...\",\
         \"companions\":[\"...\"]}}"
    )
}

/// Expected: `{"healthy":bool,"diseases":[{"name":"...","symptoms":["..."]}]}`
pub fn disease_diagnosis(crop_name: &str, notes: Option<&str>) -> String {
    let notes = notes
        .map(|n| format!("Grower notes: {}\n", n.trim()))
        .unwrap_or_default();

    format!(
        "Diagnose the plant in this image.\n\
         The plant is {crop_name}.\n\
         {notes}\
         If the plant looks healthy, return an empty disease list.\n\
         {JSON_ONLY}\n\
         Shape: {{\"healthy\":true,\"diseases\":[{{\"name\":\"disease name\",\"symptoms\":[\"visible symptom\"]}}]}}"
    )
}

/// Expected: `{"description":"...","symptoms":[],"causes":[],"treatments":[],"prevention":[]}`
pub fn disease_profile(name: &str, crop_name: &str) -> String {
    format!(
        "Describe the plant disease {name} affecting {crop_name}.\n\
         {JSON_ONLY}\n\
         Shape: {{\"description\":\"...\",\"symptoms\":[\"...\"],\"causes\":[\"...\"],\
         \"treatments\":[\"...\"],\"prevention\":[\"...\"]}}"
    )
}

/// Text embedded for semantic deduplication of crops
pub fn crop_embedding_text(name: &str, scientific_name: &str) -> String {
    format!("{} ({})", name.trim(), scientific_name.trim())
}

/// Text embedded for semantic deduplication of diseases
pub fn disease_embedding_text(name: &str, crop_name: &str, symptoms: &[String]) -> String {
    if symptoms.is_empty() {
        format!("{} on {}", name.trim(), crop_name.trim())
    } else {
        format!("{} on {}: {}", name.trim(), crop_name.trim(), symptoms.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_conditions_skip_blank_fields() {
        let attributes = ManualAttributes {
            soil_type: Some("loamy".to_string()),
            climate: Some("  ".to_string()),
            temperature: Some(24.5),
            ..Default::default()
        };
        assert_eq!(
            manual_conditions(&attributes),
            "- Soil type: loamy\n- Temperature (°C): 24.5"
        );
    }

    #[test]
    fn test_prompts_embed_identity() {
        let prompt = crop_profile("Tomato", "Solanum lycopersicum", "- Season: summer");
        assert!(prompt.starts_with("Describe the crop Tomato (Solanum lycopersicum)."));
        assert!(prompt.contains("- Season: summer"));

        let prompt = disease_diagnosis("Tomato", Some(" yellow leaves "));
        assert!(prompt.contains("Grower notes: yellow leaves"));
    }

    #[test]
    fn test_weather_conditions_include_state_when_present() {
        let weather = WeatherAverages {
            avg_max_temp: 31.0,
            avg_min_temp: 21.0,
            avg_humidity: 65.0,
            avg_rainfall: 2.5,
            avg_wind_speed: 12.0,
            dominant_wind_direction: "W".to_string(),
        };
        let location = Location {
            city: "Pune".to_string(),
            state: Some("Maharashtra".to_string()),
            country: "India".to_string(),
        };
        let text = weather_conditions(&location, &weather, 16);
        assert!(text.starts_with("- Location: Pune, Maharashtra, India"));
        assert!(text.contains("over 16 days"));
        assert!(text.ends_with("Dominant wind direction: W"));
    }
}
