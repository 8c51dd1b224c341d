//! Câmera – captura em background e stream MJPEG compartilhado.
//!
//! Uma única instância [`CameraStream`] possui o dispositivo e roda uma
//! thread de captura que codifica JPEG e substitui o "frame atual". Cada
//! conexão HTTP lê esse frame por [`CameraStream::frames`], sem dirigir a
//! captura. [`CameraManager`] guarda a instância ativa e a recria quando a
//! resolução ou a qualidade mudam.
//!
//! ```text
//! Uninitialized ──stream(cfg)──▶ Running ──stop()──▶ Stopped
//!                                  │ ▲
//!                                  └─┘ reconfigure (size/quality)
//! ```

use bytes::Bytes;
use futures::Stream;
use hive_core::config::{CameraBackendKind, CameraConfig, valid_frame_size};
use hive_core::protocol::encode_part;
use image::codecs::jpeg::JpegEncoder;
use image::{Rgb, RgbImage};
use std::io::Read;
use std::process::{Child, ChildStdout, Command, Stdio};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Pausa do loop após falha de encode/captura.
const RETRY_PAUSE: Duration = Duration::from_millis(10);

/// Pausa do consumidor enquanto não há frame novo.
const FRAME_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Erros do subsistema de câmera.
#[derive(Debug, thiserror::Error)]
pub enum CameraError {
    #[error("Câmera indisponível: {0}")]
    Unavailable(String),

    #[error("Câmera desconectada: {0}")]
    Disconnected(String),

    #[error("Falha de captura: {0}")]
    Capture(String),

    #[error("Falha ao codificar JPEG: {0}")]
    Encode(#[from] image::ImageError),
}

// ──────────────────────────────────────────────
// Configuração do stream
// ──────────────────────────────────────────────

/// Parâmetros de uma instância de captura.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamConfig {
    pub width: u32,
    pub height: u32,
    pub framerate: u32,
    pub quality: u8,
}

impl StreamConfig {
    /// Resolução padrão inválida na config cai em 640x480.
    pub fn from_defaults(defaults: &CameraConfig) -> Self {
        let (width, height) = if valid_frame_size(defaults.width, defaults.height) {
            (defaults.width, defaults.height)
        } else {
            let fallback = CameraConfig::default();
            (fallback.width, fallback.height)
        };
        Self {
            width,
            height,
            framerate: defaults.framerate.clamp(1, 60),
            quality: defaults.quality.clamp(1, 100),
        }
    }

    /// Monta a config a partir da query de `/camera_feed`.
    ///
    /// `size` malformado cai na resolução padrão; framerate e qualidade
    /// inválidos caem nos padrões e são limitados a 1–60 / 1–100.
    pub fn from_query(
        size: Option<&str>,
        framerate: Option<&str>,
        quality: Option<&str>,
        defaults: &CameraConfig,
    ) -> Self {
        let base = Self::from_defaults(defaults);
        let (width, height) = size
            .and_then(Self::parse_size)
            .unwrap_or((base.width, base.height));
        let framerate = framerate
            .and_then(|f| f.trim().parse::<u32>().ok())
            .map(|f| f.clamp(1, 60))
            .unwrap_or(base.framerate);
        let quality = quality
            .and_then(|q| q.trim().parse::<u32>().ok())
            .map(|q| q.clamp(1, 100) as u8)
            .unwrap_or(base.quality);

        Self {
            width,
            height,
            framerate,
            quality,
        }
    }

    /// `"WxH"` → `(W, H)`. Dimensões nulas ou ímpares são rejeitadas.
    pub fn parse_size(size: &str) -> Option<(u32, u32)> {
        let (w, h) = size.trim().split_once(['x', 'X'])?;
        let w: u32 = w.trim().parse().ok()?;
        let h: u32 = h.trim().parse().ok()?;
        valid_frame_size(w, h).then_some((w, h))
    }

    /// Resolução ou qualidade diferentes exigem uma nova instância.
    ///
    /// Mudança só de framerate reaproveita a instância atual.
    pub fn needs_restart(&self, requested: &StreamConfig) -> bool {
        self.width != requested.width
            || self.height != requested.height
            || self.quality != requested.quality
    }

    fn frame_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / f64::from(self.framerate.max(1)))
    }
}

// ──────────────────────────────────────────────
// Dispositivo
// ──────────────────────────────────────────────

/// Libera o dispositivo a partir de outra thread.
pub type ReleaseHandle = Box<dyn FnOnce() + Send>;

/// Dispositivo de captura aberto.
pub trait CameraDevice: Send {
    /// Verificação pós-aquecimento; erro aqui aborta a criação da instância.
    fn ready(&mut self) -> Result<(), CameraError> {
        Ok(())
    }

    /// Captura um frame bruto RGB. Bloqueante.
    fn capture(&mut self) -> Result<RgbImage, CameraError>;

    /// Handle de liberação, obtido antes da captura começar.
    ///
    /// Chamado uma única vez, fora da thread de captura; deve destravar
    /// um `capture` bloqueado.
    fn release_handle(&mut self) -> ReleaseHandle;
}

/// Fábrica de dispositivos.
pub trait CameraBackend: Send + Sync {
    fn name(&self) -> &'static str;

    fn open(&self, config: &StreamConfig) -> Result<Box<dyn CameraDevice>, CameraError>;
}

/// Seleciona o backend conforme a config.
pub fn backend_from_config(config: &CameraConfig) -> Arc<dyn CameraBackend> {
    match config.backend {
        CameraBackendKind::Libcamera => Arc::new(LibcameraBackend {
            command: config.command.clone(),
        }),
        CameraBackendKind::TestPattern => Arc::new(TestPatternBackend),
    }
}

/// Codifica um frame RGB em JPEG.
pub fn encode_jpeg(image: &RgbImage, quality: u8) -> Result<Bytes, CameraError> {
    let mut buf = Vec::with_capacity((image.width() * image.height() / 4) as usize);
    JpegEncoder::new_with_quality(&mut buf, quality).encode_image(image)?;
    Ok(Bytes::from(buf))
}

// ──────────────────────────────────────────────
// Instância de captura
// ──────────────────────────────────────────────

/// Um frame JPEG com número de sequência crescente.
#[derive(Debug, Clone)]
pub struct Frame {
    pub seq: u64,
    pub jpeg: Bytes,
}

/// Estado compartilhado entre a thread de captura e os leitores.
struct Shared {
    running: AtomicBool,
    current: Mutex<Option<Frame>>,
    encode_failures: AtomicU64,
}

/// Instância em execução: dispositivo + thread de captura.
pub struct CameraStream {
    config: StreamConfig,
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
    release: Mutex<Option<ReleaseHandle>>,
    stop_timeout: Duration,
}

impl CameraStream {
    /// Abre o dispositivo, aguarda o aquecimento e inicia a captura.
    pub fn start(
        backend: &dyn CameraBackend,
        config: StreamConfig,
        warmup: Duration,
        stop_timeout: Duration,
    ) -> Result<Arc<Self>, CameraError> {
        let mut device = backend.open(&config)?;
        let release = device.release_handle();
        std::thread::sleep(warmup);
        if let Err(e) = device.ready() {
            release();
            return Err(e);
        }

        let shared = Arc::new(Shared {
            running: AtomicBool::new(true),
            current: Mutex::new(None),
            encode_failures: AtomicU64::new(0),
        });

        let loop_shared = Arc::clone(&shared);
        let quality = config.quality;
        let spawned = std::thread::Builder::new()
            .name("camera-capture".into())
            .spawn(move || capture_loop(device, &loop_shared, quality));
        let worker = match spawned {
            Ok(worker) => worker,
            Err(e) => {
                release();
                return Err(CameraError::Unavailable(format!("falha ao criar thread de captura: {e}")));
            }
        };

        info!(
            "Câmera ({}) iniciada: {}x{} @ {}fps, qualidade {}",
            backend.name(),
            config.width,
            config.height,
            config.framerate,
            config.quality
        );

        Ok(Arc::new(Self {
            config,
            shared,
            worker: Mutex::new(Some(worker)),
            release: Mutex::new(Some(release)),
            stop_timeout,
        }))
    }

    pub fn config(&self) -> StreamConfig {
        self.config
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    /// Último frame completo (com sequência), sem bloquear a captura.
    pub fn latest(&self) -> Option<Frame> {
        self.shared
            .current
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    /// Bytes JPEG do frame atual.
    pub fn current_frame(&self) -> Option<Bytes> {
        self.latest().map(|f| f.jpeg)
    }

    /// Sinaliza o fim do loop, aguarda por até `stop_timeout` e libera
    /// o dispositivo.
    ///
    /// Idempotente. A liberação acontece ao retornar, mesmo que a thread
    /// ainda esteja presa numa captura.
    pub fn stop(&self) {
        self.shared.running.store(false, Ordering::Release);

        let worker = self.worker.lock().unwrap_or_else(|p| p.into_inner()).take();
        if let Some(worker) = worker {
            let deadline = Instant::now() + self.stop_timeout;
            while !worker.is_finished() && Instant::now() < deadline {
                std::thread::sleep(Duration::from_millis(5));
            }

            if worker.is_finished() {
                if worker.join().is_err() {
                    warn!("Thread de captura terminou com pânico");
                }
            } else {
                warn!(
                    "Thread de captura não terminou em {:?}; liberando o dispositivo assim mesmo",
                    self.stop_timeout
                );
            }
        }

        let release = self.release.lock().unwrap_or_else(|p| p.into_inner()).take();
        if let Some(release) = release {
            release();
            info!(
                "Câmera parada ({}x{}, {} falhas de encode)",
                self.config.width,
                self.config.height,
                self.shared.encode_failures.load(Ordering::Relaxed)
            );
        }
    }

    /// Sequência infinita de partes MJPEG para uma conexão.
    ///
    /// Emite cada frame novo uma vez; sem frame novo, pausa brevemente.
    /// Termina quando a instância é parada. Soltar o stream (cliente
    /// desconectado) encerra a sequência.
    pub fn frames(self: Arc<Self>) -> impl Stream<Item = Bytes> + Send + 'static {
        futures::stream::unfold((self, 0u64), |(stream, last_seq)| async move {
            loop {
                if !stream.is_running() {
                    return None;
                }
                match stream.latest() {
                    Some(frame) if frame.seq != last_seq => {
                        let part = Bytes::from(encode_part(&frame.jpeg));
                        return Some((part, (stream, frame.seq)));
                    }
                    _ => tokio::time::sleep(FRAME_POLL_INTERVAL).await,
                }
            }
        })
    }
}

impl Drop for CameraStream {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Zera `running` ao sair do loop, inclusive por pânico.
struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Loop da thread de captura. Captura e encode ficam fora do lock.
fn capture_loop(mut device: Box<dyn CameraDevice>, shared: &Shared, quality: u8) {
    let _running = RunningGuard(&shared.running);
    let mut seq = 0u64;

    while shared.running.load(Ordering::Acquire) {
        let raw = match device.capture() {
            Ok(raw) => raw,
            Err(CameraError::Disconnected(e)) => {
                warn!("Câmera desconectada, encerrando captura: {e}");
                break;
            }
            Err(e) => {
                debug!("Captura falhou: {e}");
                std::thread::sleep(RETRY_PAUSE);
                continue;
            }
        };

        match encode_jpeg(&raw, quality) {
            Ok(jpeg) => {
                seq += 1;
                let mut current = shared.current.lock().unwrap_or_else(|p| p.into_inner());
                *current = Some(Frame { seq, jpeg });
            }
            Err(e) => {
                shared.encode_failures.fetch_add(1, Ordering::Relaxed);
                debug!("Encode JPEG falhou: {e}");
                std::thread::sleep(RETRY_PAUSE);
            }
        }
    }

    debug!("Loop de captura encerrado após {seq} frames");
}

// ──────────────────────────────────────────────
// Gerenciador (singleton injetado)
// ──────────────────────────────────────────────

/// Dono da instância ativa. Um único mutex guarda check-and-recreate.
pub struct CameraManager {
    backend: Arc<dyn CameraBackend>,
    warmup: Duration,
    stop_timeout: Duration,
    active: Mutex<Option<Arc<CameraStream>>>,
}

impl CameraManager {
    pub fn new(backend: Arc<dyn CameraBackend>, config: &CameraConfig) -> Self {
        Self {
            backend,
            warmup: Duration::from_millis(config.warmup_ms),
            stop_timeout: Duration::from_millis(config.stop_timeout_ms),
            active: Mutex::new(None),
        }
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Instância para `requested`, criando ou recriando conforme necessário.
    ///
    /// Bloqueante (aquecimento do dispositivo). A instância antiga é parada
    /// antes da nova abrir o dispositivo.
    pub fn stream(&self, requested: StreamConfig) -> Result<Arc<CameraStream>, CameraError> {
        let mut active = self.active.lock().unwrap_or_else(|p| p.into_inner());

        if let Some(current) = active.as_ref() {
            if current.is_running() && !current.config().needs_restart(&requested) {
                return Ok(Arc::clone(current));
            }
            info!(
                "Reconfigurando câmera: {}x{} q{} → {}x{} q{}",
                current.config().width,
                current.config().height,
                current.config().quality,
                requested.width,
                requested.height,
                requested.quality
            );
            current.stop();
        }
        *active = None;

        let stream = CameraStream::start(
            self.backend.as_ref(),
            requested,
            self.warmup,
            self.stop_timeout,
        )?;
        *active = Some(Arc::clone(&stream));
        Ok(stream)
    }

    /// Instância ativa, se houver.
    pub fn current(&self) -> Option<Arc<CameraStream>> {
        self.active.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    /// Para a instância ativa (encerramento do processo).
    pub fn shutdown(&self) {
        if let Some(stream) = self.active.lock().unwrap_or_else(|p| p.into_inner()).take() {
            stream.stop();
        }
    }
}

// ──────────────────────────────────────────────
// Backend libcamera (rpicam-vid)
// ──────────────────────────────────────────────

/// Captura via `rpicam-vid --codec yuv420`, lendo frames I420 do stdout.
pub struct LibcameraBackend {
    pub command: String,
}

impl CameraBackend for LibcameraBackend {
    fn name(&self) -> &'static str {
        "libcamera"
    }

    fn open(&self, config: &StreamConfig) -> Result<Box<dyn CameraDevice>, CameraError> {
        let mut child = Command::new(&self.command)
            .args([
                "-t",
                "0",
                "--nopreview",
                "--codec",
                "yuv420",
                "--width",
                &config.width.to_string(),
                "--height",
                &config.height.to_string(),
                "--framerate",
                &config.framerate.to_string(),
                "--flush",
                "-o",
                "-",
            ])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| CameraError::Unavailable(format!("falha ao executar {}: {e}", self.command)))?;

        let device = LibcameraDevice::new(self.command.clone(), child, config.width, config.height)?;
        Ok(Box::new(device))
    }
}

/// Processo `rpicam-vid` lendo frames I420. O processo é encerrado pelo
/// handle de liberação ou, no máximo, no drop.
struct LibcameraDevice {
    command: String,
    child: Arc<Mutex<Child>>,
    stdout: ChildStdout,
    width: u32,
    height: u32,
    buf: Vec<u8>,
}

impl LibcameraDevice {
    fn new(command: String, mut child: Child, width: u32, height: u32) -> Result<Self, CameraError> {
        let Some(stdout) = child.stdout.take() else {
            kill_child(&mut child);
            return Err(CameraError::Unavailable(format!("stdout de {command} indisponível")));
        };
        Ok(Self {
            command,
            child: Arc::new(Mutex::new(child)),
            stdout,
            width,
            height,
            buf: vec![0; i420_frame_len(width, height)],
        })
    }
}

fn kill_child(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}

impl CameraDevice for LibcameraDevice {
    fn ready(&mut self) -> Result<(), CameraError> {
        let status = self.child.lock().unwrap_or_else(|p| p.into_inner()).try_wait();
        match status {
            Ok(None) => Ok(()),
            Ok(Some(status)) => Err(CameraError::Unavailable(format!(
                "{} saiu durante o aquecimento ({status})",
                self.command
            ))),
            Err(e) => Err(CameraError::Unavailable(e.to_string())),
        }
    }

    fn capture(&mut self) -> Result<RgbImage, CameraError> {
        self.stdout.read_exact(&mut self.buf).map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                CameraError::Disconnected(format!("{} encerrou o stream", self.command))
            } else {
                CameraError::Capture(e.to_string())
            }
        })?;
        i420_to_rgb(&self.buf, self.width, self.height)
    }

    fn release_handle(&mut self) -> ReleaseHandle {
        let child = Arc::clone(&self.child);
        Box::new(move || kill_child(&mut child.lock().unwrap_or_else(|p| p.into_inner())))
    }
}

impl Drop for LibcameraDevice {
    fn drop(&mut self) {
        kill_child(&mut self.child.lock().unwrap_or_else(|p| p.into_inner()));
    }
}

/// Planos de croma I420: metade da resolução, arredondada para cima.
fn chroma_dims(width: u32, height: u32) -> (usize, usize) {
    (width.div_ceil(2) as usize, height.div_ceil(2) as usize)
}

/// Tamanho de um frame I420 (Y cheio + U/V em 1/4).
pub fn i420_frame_len(width: u32, height: u32) -> usize {
    let (cw, ch) = chroma_dims(width, height);
    width as usize * height as usize + 2 * cw * ch
}

/// Converte I420 (BT.601, faixa limitada) para RGB.
pub fn i420_to_rgb(buf: &[u8], width: u32, height: u32) -> Result<RgbImage, CameraError> {
    let expected = i420_frame_len(width, height);
    if buf.len() < expected {
        return Err(CameraError::Capture(format!(
            "frame I420 incompleto: {} de {expected} bytes",
            buf.len()
        )));
    }

    let (w, h) = (width as usize, height as usize);
    let (cw, ch) = chroma_dims(width, height);
    let y_plane = &buf[..w * h];
    let u_plane = &buf[w * h..w * h + cw * ch];
    let v_plane = &buf[w * h + cw * ch..expected];

    Ok(RgbImage::from_fn(width, height, |x, y| {
        let (x, y) = (x as usize, y as usize);
        let c = (y / 2) * cw + x / 2;
        let luma = f32::from(y_plane[y * w + x]) - 16.0;
        let u = f32::from(u_plane[c]) - 128.0;
        let v = f32::from(v_plane[c]) - 128.0;

        let r = 1.164 * luma + 1.596 * v;
        let g = 1.164 * luma - 0.392 * u - 0.813 * v;
        let b = 1.164 * luma + 2.017 * u;
        Rgb([clamp_u8(r), clamp_u8(g), clamp_u8(b)])
    }))
}

fn clamp_u8(v: f32) -> u8 {
    v.round().clamp(0.0, 255.0) as u8
}

// ──────────────────────────────────────────────
// Backend de teste (sem hardware)
// ──────────────────────────────────────────────

/// Gradiente animado para desenvolvimento sem câmera.
pub struct TestPatternBackend;

impl CameraBackend for TestPatternBackend {
    fn name(&self) -> &'static str {
        "test_pattern"
    }

    fn open(&self, config: &StreamConfig) -> Result<Box<dyn CameraDevice>, CameraError> {
        Ok(Box::new(TestPatternDevice {
            width: config.width,
            height: config.height,
            interval: config.frame_interval(),
            tick: 0,
        }))
    }
}

struct TestPatternDevice {
    width: u32,
    height: u32,
    interval: Duration,
    tick: u32,
}

impl CameraDevice for TestPatternDevice {
    fn capture(&mut self) -> Result<RgbImage, CameraError> {
        std::thread::sleep(self.interval);
        let (w, h) = (self.width.max(1), self.height.max(1));
        self.tick = (self.tick + 4) % w;
        let tick = self.tick;
        Ok(RgbImage::from_fn(self.width, self.height, |x, y| {
            let r = ((x + tick) % w * 255 / w) as u8;
            let g = (y * 255 / h) as u8;
            Rgb([r, g, 128])
        }))
    }

    fn release_handle(&mut self) -> ReleaseHandle {
        Box::new(|| {})
    }
}

// ──────────────────────────────────────────────
// Testes
// ──────────────────────────────────────────────
