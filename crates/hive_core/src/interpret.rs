//! Motor de interpretação – classifica leituras em faixas qualitativas.
//!
//! Função pura: não toca hardware nem o store.

use crate::config::BandThresholds;
use crate::types::{HumidityStatus, Interpretation, Reading, TemperatureStatus};

/// Interpreta uma leitura com os limites padrão.
pub fn interpret(reading: &Reading) -> Interpretation {
    interpret_with(reading, &BandThresholds::default())
}

/// Interpreta uma leitura contra os limites configurados.
///
/// Leituras com erro são interpretadas mesmo assim (campos ausentes viram
/// `unknown`).
pub fn interpret_with(reading: &Reading, thresholds: &BandThresholds) -> Interpretation {
    Interpretation {
        temperature_status: temperature_status(reading.temperature_c, thresholds),
        humidity_status: humidity_status(reading.humidity, thresholds),
    }
}

/// Faixa de temperatura: `[min, max]` ideal, abaixo de `too_cold_below`
/// frio demais, acima de `overheat_above` superaquecida, resto `warning`.
pub fn temperature_status(value: Option<f32>, t: &BandThresholds) -> TemperatureStatus {
    let Some(v) = value.filter(|v| v.is_finite()) else {
        return TemperatureStatus::Unknown;
    };
    match band(v, t.temp_too_cold_below, t.temp_ideal_min, t.temp_ideal_max, t.temp_overheat_above) {
        Band::Ideal => TemperatureStatus::Ideal,
        Band::Low => TemperatureStatus::TooCold,
        Band::High => TemperatureStatus::Overheating,
        Band::Buffer => TemperatureStatus::Warning,
    }
}

/// Faixa de umidade, mesma estrutura da temperatura.
pub fn humidity_status(value: Option<f32>, t: &BandThresholds) -> HumidityStatus {
    let Some(v) = value.filter(|v| v.is_finite()) else {
        return HumidityStatus::Unknown;
    };
    match band(v, t.hum_too_dry_below, t.hum_ideal_min, t.hum_ideal_max, t.hum_too_damp_above) {
        Band::Ideal => HumidityStatus::Ideal,
        Band::Low => HumidityStatus::TooDry,
        Band::High => HumidityStatus::TooDamp,
        Band::Buffer => HumidityStatus::Warning,
    }
}

enum Band {
    Ideal,
    Low,
    High,
    Buffer,
}

fn band(value: f32, low_below: f32, ideal_min: f32, ideal_max: f32, high_above: f32) -> Band {
    if (ideal_min..=ideal_max).contains(&value) {
        Band::Ideal
    } else if value < low_below {
        Band::Low
    } else if value > high_above {
        Band::High
    } else {
        Band::Buffer
    }
}
