//! Definição de tipos/structs do domínio da colmeia.
//!
//! Leituras instantâneas (`Reading`, `MotionState`) são efêmeras; apenas
//! [`InterpretedRecord`] é persistido no log JSON.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ──────────────────────────────────────────────
// Leitura DHT
// ──────────────────────────────────────────────

/// Amostra instantânea de temperatura/umidade, possivelmente com erro.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Reading {
    /// Temperatura (°C), uma casa decimal
    pub temperature_c: Option<f32>,
    /// Umidade relativa (%), uma casa decimal
    pub humidity: Option<f32>,
    /// Mensagem de erro do sensor
    pub error: Option<String>,
}

impl Reading {
    /// Leitura válida, sem erro.
    pub fn ok(temperature_c: f32, humidity: f32) -> Self {
        Self {
            temperature_c: Some(round1(temperature_c)),
            humidity: Some(round1(humidity)),
            error: None,
        }
    }

    /// Leitura com falha: ambos os campos numéricos ausentes.
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            temperature_c: None,
            humidity: None,
            error: Some(error.into()),
        }
    }

    /// `true` quando temperatura e umidade estão ausentes.
    pub fn is_empty(&self) -> bool {
        self.temperature_c.is_none() && self.humidity.is_none()
    }
}

/// Arredonda para uma casa decimal.
pub fn round1(value: f32) -> f32 {
    (value * 10.0).round() / 10.0
}

// ──────────────────────────────────────────────
// Interpretação
// ──────────────────────────────────────────────

/// Faixa qualitativa de temperatura.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemperatureStatus {
    Ideal,
    TooCold,
    Overheating,
    Warning,
    #[default]
    Unknown,
}

/// Faixa qualitativa de umidade.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HumidityStatus {
    Ideal,
    TooDry,
    TooDamp,
    Warning,
    #[default]
    Unknown,
}

/// Resultado do motor de interpretação.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interpretation {
    pub temperature_status: TemperatureStatus,
    pub humidity_status: HumidityStatus,
}

// ──────────────────────────────────────────────
// Registro persistido
// ──────────────────────────────────────────────

/// Unidade persistida: leitura + interpretação com timestamp UTC.
///
/// Imutável depois de anexada ao log. `error` e `interpretation` têm
/// default para tolerar arquivos já limpos pelo utilitário offline.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct InterpretedRecord {
    /// `YYYY-MM-DDTHH:MM:SSZ`
    pub timestamp: String,
    pub temperature_c: Option<f32>,
    pub humidity: Option<f32>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub interpretation: Interpretation,
}

impl InterpretedRecord {
    pub fn new(reading: Reading, interpretation: Interpretation, at: DateTime<Utc>) -> Self {
        Self {
            timestamp: format_timestamp(at),
            temperature_c: reading.temperature_c,
            humidity: reading.humidity,
            error: reading.error,
            interpretation,
        }
    }
}

/// Formata um instante UTC com precisão de segundos.
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

// ──────────────────────────────────────────────
// Movimento (PIR)
// ──────────────────────────────────────────────

/// Estado do sensor de presença: `motion = None` significa desconhecido.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct MotionState {
    pub motion: Option<bool>,
    pub error: Option<String>,
}

impl MotionState {
    pub fn known(motion: bool) -> Self {
        Self {
            motion: Some(motion),
            error: None,
        }
    }

    pub fn unknown(error: impl Into<String>) -> Self {
        Self {
            motion: None,
            error: Some(error.into()),
        }
    }

    pub fn status(&self) -> MotionStatus {
        match self.motion {
            Some(true) => MotionStatus::Detected,
            Some(false) => MotionStatus::None,
            None => MotionStatus::Unknown,
        }
    }
}

/// Rótulo de movimento exposto em `/api/sensor`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MotionStatus {
    Detected,
    None,
    Unknown,
}

// ──────────────────────────────────────────────
// Payload do dashboard
// ──────────────────────────────────────────────

/// Resposta de `/api/sensor`. Nunca carrega campos de erro.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SensorSnapshot {
    pub temperature_c: Option<f32>,
    pub humidity: Option<f32>,
    /// Presente apenas quando os valores vêm do último registro persistido
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    pub interpretation: Interpretation,
    pub motion: Option<bool>,
    pub motion_status: MotionStatus,
}

// ──────────────────────────────────────────────
// Testes
// ──────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn reading_ok_rounds_to_one_decimal() {
        let r = Reading::ok(22.449, 55.06);
        assert_eq!(r.temperature_c, Some(22.4));
        assert_eq!(r.humidity, Some(55.1));
        assert!(r.error.is_none());
    }

    #[test]
    fn failed_reading_is_empty() {
        let r = Reading::failed("Invalid sensor reading");
        assert!(r.is_empty());
        assert_eq!(r.error.as_deref(), Some("Invalid sensor reading"));
    }

    #[test]
    fn status_serializes_snake_case() {
        let json = serde_json::to_string(&Interpretation {
            temperature_status: TemperatureStatus::TooCold,
            humidity_status: HumidityStatus::TooDamp,
        })
        .unwrap();
        assert_eq!(
            json,
            r#"{"temperature_status":"too_cold","humidity_status":"too_damp"}"#
        );
    }

    #[test]
    fn timestamp_has_second_precision() {
        let at = Utc.with_ymd_and_hms(2025, 3, 9, 7, 5, 1).unwrap();
        assert_eq!(format_timestamp(at), "2025-03-09T07:05:01Z");
    }

    #[test]
    fn cleaned_record_without_error_key_parses() {
        let json = r#"{
            "timestamp": "2025-03-09T07:05:01Z",
            "temperature_c": 33.2,
            "humidity": 56.1,
            "interpretation": {"temperature_status": "ideal", "humidity_status": "ideal"}
        }"#;
        let rec: InterpretedRecord = serde_json::from_str(json).unwrap();
        assert_eq!(rec.temperature_c, Some(33.2));
        assert!(rec.error.is_none());
        assert_eq!(rec.interpretation.temperature_status, TemperatureStatus::Ideal);
    }

    #[test]
    fn motion_status_labels() {
        assert_eq!(MotionState::known(true).status(), MotionStatus::Detected);
        assert_eq!(MotionState::known(false).status(), MotionStatus::None);
        assert_eq!(MotionState::unknown("boom").status(), MotionStatus::Unknown);
        assert_eq!(serde_json::to_string(&MotionStatus::None).unwrap(), "\"none\"");
    }

    #[test]
    fn snapshot_omits_absent_timestamp() {
        let snap = SensorSnapshot {
            temperature_c: Some(34.0),
            humidity: Some(60.0),
            timestamp: None,
            interpretation: Interpretation::default(),
            motion: None,
            motion_status: MotionStatus::Unknown,
        };
        let value = serde_json::to_value(&snap).unwrap();
        assert!(value.get("timestamp").is_none());
        assert!(value.get("error").is_none());
    }
}
