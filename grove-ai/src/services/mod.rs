//! External collaborators and pure helpers used by the pipelines

pub mod ai_client;
pub mod image_host;
pub mod json_extract;
pub mod similarity;
pub mod temp_files;
pub mod weather_client;

pub use ai_client::{GeminiClient, GenerationError, GenerationProvider, ImageInput};
pub use image_host::{CloudinaryClient, CloudinaryCredentials, HostedImage, ImageHost, ImageHostError};
pub use json_extract::{parse_generated, ExtractError};
pub use similarity::{best_match, cosine_similarity};
pub use temp_files::{TempFile, TempFileStore};
pub use weather_client::{Coordinates, OpenMeteoClient, WeatherAverages, WeatherError, WeatherProvider};
