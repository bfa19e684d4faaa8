//! Data models for grove-ai

pub mod requests;

pub use requests::{
    DetectionBody, DetectionMode, DetectionRequest, ImageBody, ImageUpload, Location,
    ManualAttributes, SuggestionBody, SuggestionInput, SuggestionMode, SuggestionRequest,
    MAX_IMAGE_BYTES,
};
