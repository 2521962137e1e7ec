#[cfg(feature = "backend-opencv")]
pub mod darknet;
pub mod scripted;

#[cfg(feature = "backend-tract")]
pub mod tract;

#[cfg(feature = "backend-opencv")]
pub use darknet::DarknetBackend;
pub use scripted::ScriptedBackend;

#[cfg(feature = "backend-tract")]
pub use tract::TractBackend;
