//! Configuration: TOML schema plus loading/interpolation.

mod loader;
mod schema;

pub use loader::{load, settings_path};
pub use schema::{
    AnalysisSettings, AudioSettings, BusSettings, CaptureSettings, DataSettings, SamplerSettings,
    ServerSettings, SynthesisSettings, TraqSettings,
};
