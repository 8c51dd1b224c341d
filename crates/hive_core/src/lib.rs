//! # Hive Core
//!
//! Crate compartilhada com o modelo de dados da colmeia, o motor de
//! interpretação, o store de registros JSON, o envelope MJPEG e a
//! configuração TOML.
//!
//! ## Módulos
//! - [`types`] – Leituras, registros, estado de movimento
//! - [`interpret`] – Faixas ideal / warning / too_* / unknown
//! - [`store`] – Log append-only em JSON
//! - [`protocol`] – Partes `multipart/x-mixed-replace`
//! - [`config`] – Configuração unificada via TOML

pub mod types;
pub mod interpret;
pub mod store;
pub mod protocol;
pub mod config;

// Re-exports convenientes
pub use types::{InterpretedRecord, Interpretation, MotionState, Reading, SensorSnapshot};
pub use interpret::{interpret, interpret_with};
pub use store::RecordStore;
pub use config::AppConfig;
