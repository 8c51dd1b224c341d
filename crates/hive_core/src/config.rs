//! Configuração unificada via TOML.
//!
//! Um único `config.toml` cobre servidor, sensores, câmera, store e faixas.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Seleção de backend para sensores com fallback simulado.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendChoice {
    /// Sonda o hardware uma vez na inicialização
    #[default]
    Auto,
    Hardware,
    Simulated,
}

/// Servidor HTTP.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Diretório de arquivos estáticos do dashboard (ignorado se não existir)
    pub static_dir: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 5000,
            static_dir: PathBuf::from("static"),
        }
    }
}

/// Sensor DHT de temperatura/umidade.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorConfig {
    pub backend: BackendChoice,
    /// Linha GPIO do DHT11 (BCM)
    pub gpio_pin: u32,
    /// Raiz dos dispositivos IIO do kernel
    pub iio_root: PathBuf,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            backend: BackendChoice::Auto,
            gpio_pin: 4,
            iio_root: PathBuf::from("/sys/bus/iio/devices"),
        }
    }
}

/// Sensor PIR e LED indicador.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MotionConfig {
    pub backend: BackendChoice,
    /// Linha GPIO do PIR (BCM)
    pub gpio_pin: u8,
    /// Linha GPIO do LED (BCM); 0 desabilita o indicador
    pub led_pin: u8,
    /// Período da alternância simulada (segundos)
    pub simulated_period_secs: u64,
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            backend: BackendChoice::Auto,
            gpio_pin: 17,
            led_pin: 2,
            simulated_period_secs: 10,
        }
    }
}

/// Origem dos frames da câmera.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CameraBackendKind {
    #[default]
    Libcamera,
    TestPattern,
}

/// Maior largura/altura aceita para a câmera.
pub const MAX_FRAME_DIM: u32 = 4096;

/// Dimensões de frame aceitas: não nulas, pares e até [`MAX_FRAME_DIM`].
///
/// I420 subamostra croma em 2x2, então dimensões ímpares não são aceitas.
pub fn valid_frame_size(width: u32, height: u32) -> bool {
    [width, height]
        .iter()
        .all(|&d| d > 0 && d % 2 == 0 && d <= MAX_FRAME_DIM)
}

/// Câmera e stream MJPEG.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    pub backend: CameraBackendKind,
    /// Executável de captura (rpicam-vid / libcamera-vid)
    pub command: String,
    pub width: u32,
    pub height: u32,
    pub framerate: u32,
    /// Qualidade JPEG (1–100)
    pub quality: u8,
    /// Pausa de aquecimento após abrir o dispositivo
    pub warmup_ms: u64,
    /// Espera máxima pelo fim do loop de captura ao parar
    pub stop_timeout_ms: u64,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            backend: CameraBackendKind::Libcamera,
            command: "rpicam-vid".into(),
            width: 640,
            height: 480,
            framerate: 15,
            quality: 80,
            warmup_ms: 1000,
            stop_timeout_ms: 1000,
        }
    }
}

/// Log de registros JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub path: PathBuf,
    /// Máximo de registros devolvidos por `/api/dht_records`
    pub api_limit: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data/dht_records.json"),
            api_limit: 1000,
        }
    }
}

/// Gravação periódica em background.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RecorderConfig {
    /// 0 = desabilitado (registros apenas via `/api/dht_record`)
    pub interval_secs: u64,
}

/// Limites das faixas de interpretação.
///
/// As bordas de `ideal` são inclusivas; o intervalo entre `ideal` e os
/// extremos é `warning`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BandThresholds {
    pub temp_ideal_min: f32,
    pub temp_ideal_max: f32,
    pub temp_too_cold_below: f32,
    pub temp_overheat_above: f32,
    pub hum_ideal_min: f32,
    pub hum_ideal_max: f32,
    pub hum_too_dry_below: f32,
    pub hum_too_damp_above: f32,
}

impl Default for BandThresholds {
    fn default() -> Self {
        Self {
            temp_ideal_min: 32.0,
            temp_ideal_max: 36.0,
            temp_too_cold_below: 30.0,
            temp_overheat_above: 38.0,
            hum_ideal_min: 50.0,
            hum_ideal_max: 65.0,
            hum_too_dry_below: 40.0,
            hum_too_damp_above: 70.0,
        }
    }
}

/// Configuração raiz da estação.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub sensor: SensorConfig,
    pub motion: MotionConfig,
    pub camera: CameraConfig,
    pub store: StoreConfig,
    pub recorder: RecorderConfig,
    pub thresholds: BandThresholds,
}

impl AppConfig {
    /// Carrega configuração de um arquivo TOML.
    pub fn load(path: &Path) -> Self {
        if path.exists() {
            match std::fs::read_to_string(path) {
                Ok(content) => match toml::from_str::<AppConfig>(&content) {
                    Ok(config) => {
                        info!("Configuração carregada de {}", path.display());
                        return config;
                    }
                    Err(e) => {
                        warn!("Erro ao parsear {}: {}", path.display(), e);
                    }
                },
                Err(e) => {
                    warn!("Erro ao ler {}: {}", path.display(), e);
                }
            }
        }

        info!("Usando configuração padrão");
        AppConfig::default()
    }

    /// Salva configuração em arquivo TOML.
    pub fn save(&self, path: &Path) -> Result<(), String> {
        let content = toml::to_string_pretty(self).map_err(|e| e.to_string())?;
        std::fs::write(path, content).map_err(|e| e.to_string())?;
        info!("Configuração salva em {}", path.display());
        Ok(())
    }

    /// Retorna o caminho padrão do config.toml.
    pub fn default_path() -> PathBuf {
        let exe_dir = std::env::current_exe()
            .map(|p| p.parent().unwrap_or(Path::new(".")).to_path_buf())
            .unwrap_or_else(|_| PathBuf::from("."));
        exe_dir.join("config.toml")
    }

    /// Valida a configuração e retorna lista de erros.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.server.port == 0 {
            errors.push("Porta do servidor não pode ser 0".into());
        }
        if self.camera.quality == 0 || self.camera.quality > 100 {
            errors.push(format!(
                "Qualidade JPEG inválida: {} (1–100)",
                self.camera.quality
            ));
        }
        if !valid_frame_size(self.camera.width, self.camera.height) {
            errors.push(format!(
                "Resolução padrão inválida: {}x{} (pares, 2–{MAX_FRAME_DIM})",
                self.camera.width, self.camera.height
            ));
        }
        if self.store.path.as_os_str().is_empty() {
            errors.push("Caminho do store não pode ser vazio".into());
        }

        let t = &self.thresholds;
        if !(t.temp_too_cold_below <= t.temp_ideal_min
            && t.temp_ideal_min <= t.temp_ideal_max
            && t.temp_ideal_max <= t.temp_overheat_above)
        {
            errors.push("Faixas de temperatura fora de ordem".into());
        }
        if !(t.hum_too_dry_below <= t.hum_ideal_min
            && t.hum_ideal_min <= t.hum_ideal_max
            && t.hum_ideal_max <= t.hum_too_damp_above)
        {
            errors.push("Faixas de umidade fora de ordem".into());
        }

        errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = AppConfig::default();
        let errors = config.validate();
        assert!(errors.is_empty(), "Erros: {:?}", errors);
    }

    #[test]
    fn roundtrip_toml() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(config.server.port, parsed.server.port);
        assert_eq!(config.camera.backend, parsed.camera.backend);
        assert_eq!(config.store.path, parsed.store.path);
    }

    #[test]
    fn partial_toml_uses_defaults() {
        let partial = r#"
[camera]
backend = "test_pattern"
quality = 60

[sensor]
backend = "simulated"
"#;
        let config: AppConfig = toml::from_str(partial).unwrap();
        assert_eq!(config.camera.backend, CameraBackendKind::TestPattern);
        assert_eq!(config.camera.quality, 60);
        assert_eq!(config.sensor.backend, BackendChoice::Simulated);
        // Outros campos devem ter valor padrão
        assert_eq!(config.camera.width, 640);
        assert_eq!(config.motion.gpio_pin, 17);
        assert_eq!(config.store.api_limit, 1000);
    }

    #[test]
    fn inverted_bands_are_rejected() {
        let mut config = AppConfig::default();
        config.thresholds.temp_ideal_min = 37.0;
        config.thresholds.temp_ideal_max = 33.0;
        let errors = config.validate();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("temperatura"));
    }

    #[test]
    fn odd_or_oversized_camera_size_is_rejected() {
        for (w, h) in [(641, 480), (640, 479), (8192, 480), (0, 480)] {
            let mut config = AppConfig::default();
            config.camera.width = w;
            config.camera.height = h;
            let errors = config.validate();
            assert_eq!(errors.len(), 1, "{w}x{h}: {errors:?}");
            assert!(errors[0].contains("Resolução"));
        }
        assert!(valid_frame_size(1280, 720));
        assert!(valid_frame_size(4096, 4096));
    }

    #[test]
    fn load_falls_back_on_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[[[ nope").unwrap();
        let config = AppConfig::load(&path);
        assert_eq!(config.server.port, 5000);
    }
}
