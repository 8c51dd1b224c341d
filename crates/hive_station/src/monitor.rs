//! Fonte de leituras DHT – hardware real com fallback simulado.
//!
//! **Hardware:** driver `dht11` do kernel exposto via IIO
//! (`in_temp_input` em m°C, `in_humidityrelative_input` em m%RH).
//!
//! **Simulado:** base 22.0 °C / 55.0 %, oscilação lenta pelo relógio e
//! jitter aleatório pequeno.
//!
//! O backend é escolhido uma vez na inicialização por [`probe_sensor`].

use hive_core::config::{BackendChoice, SensorConfig};
use hive_core::types::Reading;
use rand::Rng;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

/// Mensagem para valores ausentes ou sentinela.
pub const INVALID_READING: &str = "Invalid sensor reading";

/// `EIO` no Linux: checksum/timeout do protocolo one-wire.
const EIO: i32 = 5;

/// Estratégia de leitura de temperatura/umidade.
pub trait SensorBackend: Send {
    /// Nome curto para logs e `/healthz`.
    fn name(&self) -> &'static str;

    /// Uma tentativa de leitura. Nunca entra em pânico nem propaga erro.
    fn read(&mut self) -> Reading;
}

// ──────────────────────────────────────────────
// Fonte compartilhada
// ──────────────────────────────────────────────

/// Sessão única do sensor, compartilhada entre requisições.
pub struct ReadingSource {
    name: &'static str,
    backend: Mutex<Box<dyn SensorBackend>>,
}

impl ReadingSource {
    pub fn new(backend: Box<dyn SensorBackend>) -> Self {
        Self {
            name: backend.name(),
            backend: Mutex::new(backend),
        }
    }

    pub fn backend_name(&self) -> &'static str {
        self.name
    }

    /// Leitura fresca. Bloqueante (o DHT leva centenas de ms).
    pub fn read(&self) -> Reading {
        let mut backend = self
            .backend
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        backend.read()
    }
}

/// Seleciona o backend conforme a config, sondando o hardware em `auto`.
pub fn probe_sensor(config: &SensorConfig) -> Box<dyn SensorBackend> {
    match config.backend {
        BackendChoice::Simulated => {
            info!("DHT: modo simulado (config)");
            Box::new(SimulatedDht)
        }
        BackendChoice::Hardware => {
            info!("DHT: hardware forçado (GPIO{})", config.gpio_pin);
            Box::new(IioDht::new(config.iio_root.clone(), config.gpio_pin))
        }
        BackendChoice::Auto => match find_dht_device(&config.iio_root, config.gpio_pin) {
            Ok(Some(dir)) => {
                info!("✓ DHT: dispositivo IIO em {}", dir.display());
                Box::new(IioDht::new(config.iio_root.clone(), config.gpio_pin))
            }
            Ok(None) | Err(_) => {
                warn!("✗ DHT: nenhum dispositivo IIO dht* encontrado, usando leituras simuladas");
                Box::new(SimulatedDht)
            }
        },
    }
}

// ──────────────────────────────────────────────
// Simulado
// ──────────────────────────────────────────────

/// Leituras plausíveis para desenvolvimento sem hardware.
pub struct SimulatedDht;

impl SensorBackend for SimulatedDht {
    fn name(&self) -> &'static str {
        "simulated"
    }

    fn read(&mut self) -> Reading {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or_default();
        let mut rng = rand::thread_rng();
        simulated_reading(now, rng.gen_range(-0.1..0.1), rng.gen_range(-0.25..0.25))
    }
}

/// Oscilação determinística pelo relógio mais o jitter fornecido.
pub fn simulated_reading(unix_secs: f64, jitter_t: f32, jitter_h: f32) -> Reading {
    let drift_t = ((unix_secs % 10.0) - 5.0) * 0.02;
    let drift_h = ((unix_secs % 7.0) - 3.5) * 0.1;
    Reading::ok(
        22.0 + drift_t as f32 + jitter_t,
        55.0 + drift_h as f32 + jitter_h,
    )
}

// ──────────────────────────────────────────────
// Hardware (IIO)
// ──────────────────────────────────────────────

/// Canais IIO resolvidos de um dispositivo DHT.
#[derive(Debug)]
struct IioChannels {
    temperature: PathBuf,
    humidity: PathBuf,
}

/// Leitura de um canal IIO em milésimos.
type ChannelReader = fn(&Path) -> io::Result<Option<i64>>;

/// DHT11 via driver IIO do kernel. O handle é criado na primeira leitura.
pub struct IioDht {
    root: PathBuf,
    gpio_pin: u32,
    device: Option<IioChannels>,
    read_channel: ChannelReader,
}

impl IioDht {
    pub fn new(root: PathBuf, gpio_pin: u32) -> Self {
        Self {
            root,
            gpio_pin,
            device: None,
            read_channel,
        }
    }

    fn channels(&mut self) -> Result<&IioChannels, String> {
        let channels = match self.device.take() {
            Some(channels) => channels,
            None => {
                let dir = find_dht_device(&self.root, self.gpio_pin)
                    .map_err(|e| format!("Falha ao procurar DHT: {e}"))?
                    .ok_or_else(|| format!("DHT não encontrado em {}", self.root.display()))?;
                debug!("DHT inicializado em {}", dir.display());
                IioChannels {
                    temperature: dir.join("in_temp_input"),
                    humidity: dir.join("in_humidityrelative_input"),
                }
            }
        };
        Ok(self.device.insert(channels))
    }
}

impl SensorBackend for IioDht {
    fn name(&self) -> &'static str {
        "dht11-iio"
    }

    fn read(&mut self) -> Reading {
        let read = self.read_channel;
        let channels = match self.channels() {
            Ok(c) => c,
            Err(e) => return Reading::failed(e),
        };

        let raw = read(&channels.temperature).and_then(|t| read(&channels.humidity).map(|h| (t, h)));

        match raw {
            Ok((Some(t), Some(h))) => Reading::ok(t as f32 / 1000.0, h as f32 / 1000.0),
            Ok(_) => Reading::failed(INVALID_READING),
            Err(e) if is_transient(&e) => {
                debug!("Leitura DHT transitória falhou: {e}");
                Reading::failed(e.to_string())
            }
            Err(e) => {
                // Handle descartado: a próxima chamada reinicializa
                warn!("Falha inesperada no DHT, reiniciando handle: {e}");
                self.device = None;
                Reading::failed(e.to_string())
            }
        }
    }
}

/// Lê um canal em milésimos. `None` quando o valor não é numérico.
fn read_channel(path: &Path) -> io::Result<Option<i64>> {
    let raw = fs::read_to_string(path)?;
    Ok(raw.trim().parse().ok())
}

fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    ) || e.raw_os_error() == Some(EIO)
}

/// Procura `iio:device*` cujo `name` começa com `dht`.
///
/// Prefere o nó do device tree ligado à linha (`dht11@<pino hex>`).
fn find_dht_device(root: &Path, gpio_pin: u32) -> io::Result<Option<PathBuf>> {
    let suffix = format!("@{gpio_pin:x}");
    let mut fallback = None;

    for entry in fs::read_dir(root)? {
        let dir = entry?.path();
        let Ok(name) = fs::read_to_string(dir.join("name")) else {
            continue;
        };
        let name = name.trim();
        if !name.starts_with("dht") {
            continue;
        }
        if name.ends_with(&suffix) {
            return Ok(Some(dir));
        }
        fallback.get_or_insert(dir);
    }

    Ok(fallback)
}

// ──────────────────────────────────────────────
// Testes
// ──────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn fake_iio(name: &str, temp: &str, hum: &str) -> tempfile::TempDir {
        let root = tempfile::tempdir().unwrap();
        let dev = root.path().join("iio:device0");
        fs::create_dir(&dev).unwrap();
        fs::write(dev.join("name"), format!("{name}\n")).unwrap();
        fs::write(dev.join("in_temp_input"), temp).unwrap();
        fs::write(dev.join("in_humidityrelative_input"), hum).unwrap();
        root
    }

    #[test]
    fn simulated_stays_near_base() {
        let mut sim = SimulatedDht;
        for _ in 0..50 {
            let r = sim.read();
            let t = r.temperature_c.unwrap();
            let h = r.humidity.unwrap();
            assert!((21.7..=22.3).contains(&t), "t={t}");
            assert!((54.3..=55.7).contains(&h), "h={h}");
            assert!(r.error.is_none());
        }
    }

    #[test]
    fn simulated_is_continuous_in_time() {
        let a = simulated_reading(1_000.25, 0.0, 0.0);
        let b = simulated_reading(1_000.75, 0.0, 0.0);
        let dt = (a.temperature_c.unwrap() - b.temperature_c.unwrap()).abs();
        let dh = (a.humidity.unwrap() - b.humidity.unwrap()).abs();
        assert!(dt <= 0.1 && dh <= 0.1, "dt={dt} dh={dh}");
    }

    #[test]
    fn iio_reading_converts_millis() {
        let root = fake_iio("dht11@4", "34120\n", "60400\n");
        let mut dht = IioDht::new(root.path().to_path_buf(), 4);
        assert_eq!(dht.read(), Reading::ok(34.1, 60.4));
    }

    #[test]
    fn garbage_values_are_invalid_reading() {
        let root = fake_iio("dht11@4", "\n", "60400\n");
        let mut dht = IioDht::new(root.path().to_path_buf(), 4);
        let r = dht.read();
        assert!(r.is_empty());
        assert_eq!(r.error.as_deref(), Some(INVALID_READING));
    }

    #[test]
    fn missing_device_reports_error_without_panicking() {
        let root = tempfile::tempdir().unwrap();
        let mut dht = IioDht::new(root.path().to_path_buf(), 4);
        let r = dht.read();
        assert!(r.is_empty());
        assert!(r.error.unwrap().contains("DHT"));
    }

    #[test]
    fn vanished_channel_resets_handle_and_recovers() {
        let root = fake_iio("dht11@4", "30000", "50000");
        let mut dht = IioDht::new(root.path().to_path_buf(), 4);
        assert!(dht.read().error.is_none());

        let dev = root.path().join("iio:device0");
        fs::remove_file(dev.join("in_temp_input")).unwrap();
        assert!(dht.read().error.is_some());
        assert!(dht.device.is_none());

        fs::write(dev.join("in_temp_input"), "31000").unwrap();
        assert_eq!(dht.read(), Reading::ok(31.0, 50.0));
    }

    #[test]
    fn transient_errors_are_classified() {
        assert!(is_transient(&io::Error::from_raw_os_error(EIO)));
        assert!(is_transient(&io::Error::from(io::ErrorKind::TimedOut)));
        assert!(is_transient(&io::Error::from(io::ErrorKind::WouldBlock)));
        assert!(!is_transient(&io::Error::from(io::ErrorKind::NotFound)));
        assert!(!is_transient(&io::Error::from(io::ErrorKind::PermissionDenied)));
    }

    #[test]
    fn transient_fault_keeps_handle() {
        let root = fake_iio("dht11@4", "30000", "50000");
        let mut dht = IioDht::new(root.path().to_path_buf(), 4);
        dht.read_channel = |_| Err(io::Error::from_raw_os_error(EIO));

        let r = dht.read();
        assert!(r.is_empty());
        assert!(r.error.is_some());
        assert!(dht.device.is_some());

        dht.read_channel = read_channel;
        assert_eq!(dht.read(), Reading::ok(30.0, 50.0));
    }

    #[test]
    fn unexpected_fault_drops_handle() {
        let root = fake_iio("dht11@4", "30000", "50000");
        let mut dht = IioDht::new(root.path().to_path_buf(), 4);
        dht.read_channel = |_| Err(io::Error::from(io::ErrorKind::PermissionDenied));

        assert!(dht.read().error.is_some());
        assert!(dht.device.is_none());
    }

    #[test]
    fn probe_prefers_pin_match() {
        let root = fake_iio("dht22@11", "0", "0");
        let other = root.path().join("iio:device1");
        fs::create_dir(&other).unwrap();
        fs::write(other.join("name"), "dht11@4").unwrap();

        let found = find_dht_device(root.path(), 4).unwrap().unwrap();
        assert_eq!(found, other);
    }

    #[test]
    fn probe_falls_back_to_simulated() {
        let root = tempfile::tempdir().unwrap();
        let config = SensorConfig {
            iio_root: root.path().to_path_buf(),
            ..Default::default()
        };
        assert_eq!(probe_sensor(&config).name(), "simulated");

        let root = fake_iio("dht11@4", "0", "0");
        let config = SensorConfig {
            iio_root: root.path().to_path_buf(),
            ..Default::default()
        };
        assert_eq!(probe_sensor(&config).name(), "dht11-iio");
    }

    #[test]
    fn source_reports_backend_name() {
        let source = ReadingSource::new(Box::new(SimulatedDht));
        assert_eq!(source.backend_name(), "simulated");
        assert!(source.read().error.is_none());
    }
}
