//! Pipeline leitura → interpretação → registro.

use crate::monitor::ReadingSource;
use crate::motion::MotionSensor;
use chrono::Utc;
use hive_core::config::BandThresholds;
use hive_core::interpret::interpret_with;
use hive_core::store::RecordStore;
use hive_core::types::{InterpretedRecord, MotionState, Reading, SensorSnapshot};
use tracing::debug;

/// Sensores, store e faixas de uma colmeia.
pub struct Station {
    source: ReadingSource,
    motion: MotionSensor,
    store: RecordStore,
    thresholds: BandThresholds,
}

impl Station {
    pub fn new(
        source: ReadingSource,
        motion: MotionSensor,
        store: RecordStore,
        thresholds: BandThresholds,
    ) -> Self {
        Self {
            source,
            motion,
            store,
            thresholds,
        }
    }

    pub fn sensor_backend(&self) -> &'static str {
        self.source.backend_name()
    }

    pub fn motion_backend(&self) -> &'static str {
        self.motion.backend_name()
    }

    /// Lê, interpreta (mesmo com erro), carimba e anexa ao log.
    ///
    /// O registro é retornado mesmo quando a persistência falha.
    pub fn read_and_record(&self) -> InterpretedRecord {
        let reading = self.source.read();
        let interpretation = interpret_with(&reading, &self.thresholds);
        let record = InterpretedRecord::new(reading, interpretation, Utc::now());
        self.store.append(&record);
        debug!(
            "Registro {}: {:?}°C {:?}%",
            record.timestamp, record.temperature_c, record.humidity
        );
        record
    }

    pub fn motion_state(&self) -> MotionState {
        self.motion.state()
    }

    /// Payload do dashboard: leitura ao vivo, ou o último registro
    /// persistido quando a leitura não trouxe nenhum valor.
    pub fn snapshot(&self) -> SensorSnapshot {
        let live = self.source.read();

        let (temperature_c, humidity, timestamp) = if live.is_empty() {
            match self.store.latest() {
                Some(rec) => (rec.temperature_c, rec.humidity, Some(rec.timestamp)),
                None => (None, None, None),
            }
        } else {
            (live.temperature_c, live.humidity, None)
        };

        let values = Reading {
            temperature_c,
            humidity,
            error: None,
        };
        let motion = self.motion.state();

        SensorSnapshot {
            temperature_c,
            humidity,
            timestamp,
            interpretation: interpret_with(&values, &self.thresholds),
            motion: motion.motion,
            motion_status: motion.status(),
        }
    }

    /// Até `limit` registros mais recentes, em ordem de anexação.
    pub fn recent(&self, limit: usize) -> Vec<InterpretedRecord> {
        self.store.read_recent(limit)
    }
}
