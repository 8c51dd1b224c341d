//! Sensor de presença (PIR) com notificador de mudança de estado.
//!
//! O notificador guarda o último estado conhecido apenas para suprimir
//! logs e toggles de LED repetidos; não é dado de domínio.

use crate::gpio::{self, LazyPin};
use embedded_hal::digital::{InputPin, OutputPin, PinState};
use hive_core::config::{BackendChoice, MotionConfig};
use hive_core::types::MotionState;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

/// Estratégia de consulta do PIR.
pub trait MotionBackend: Send {
    fn name(&self) -> &'static str;

    /// Consulta o nível atual. `Err` carrega a mensagem para o chamador.
    fn query(&mut self) -> Result<bool, String>;

    /// Se consultas bem-sucedidas alimentam o notificador.
    fn feeds_notifier(&self) -> bool {
        true
    }
}

/// Indicador visual de movimento.
pub trait Indicator: Send {
    fn set(&mut self, on: bool) -> Result<(), String>;
}

// ──────────────────────────────────────────────
// Sensor compartilhado
// ──────────────────────────────────────────────

/// Sessão única do PIR + notificador.
pub struct MotionSensor {
    name: &'static str,
    backend: Mutex<Box<dyn MotionBackend>>,
    notifier: MotionNotifier,
}

impl MotionSensor {
    pub fn new(backend: Box<dyn MotionBackend>, notifier: MotionNotifier) -> Self {
        Self {
            name: backend.name(),
            backend: Mutex::new(backend),
            notifier,
        }
    }

    pub fn backend_name(&self) -> &'static str {
        self.name
    }

    /// Estado atual, derivado a cada chamada.
    pub fn state(&self) -> MotionState {
        let mut backend = self
            .backend
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        match backend.query() {
            Ok(motion) => {
                if backend.feeds_notifier() {
                    self.notifier.update(Some(motion));
                }
                MotionState::known(motion)
            }
            Err(e) => MotionState::unknown(e),
        }
    }

    #[cfg(test)]
    pub(crate) fn notifier(&self) -> &MotionNotifier {
        &self.notifier
    }
}

/// Monta o sensor conforme a config, sondando o GPIO em `auto`.
pub fn probe_motion(config: &MotionConfig) -> MotionSensor {
    let hardware = match config.backend {
        BackendChoice::Hardware => true,
        BackendChoice::Simulated => false,
        BackendChoice::Auto => gpio::available(),
    };

    if !hardware {
        warn!("✗ PIR: GPIO indisponível, usando alternância simulada");
        return MotionSensor::new(
            Box::new(SimulatedMotion::new(config.simulated_period_secs)),
            MotionNotifier::new(None),
        );
    }

    info!("✓ PIR: GPIO{} (LED GPIO{})", config.gpio_pin, config.led_pin);
    let pir_pin = config.gpio_pin;
    let pir = PinMotion::new(LazyPin::new(move || {
        gpio::open_input(pir_pin)
            .map_err(|e| format!("Falha ao inicializar PIR na GPIO{pir_pin}: {e}"))
    }));

    let led_pin = config.led_pin;
    let indicator = (led_pin != 0).then(|| {
        let led = LedIndicator::new(LazyPin::new(move || gpio::open_output(led_pin)));
        Box::new(led) as Box<dyn Indicator>
    });

    MotionSensor::new(Box::new(pir), MotionNotifier::new(indicator))
}

// ──────────────────────────────────────────────
// Notificador de mudança
// ──────────────────────────────────────────────

/// Loga e aciona o LED apenas quando o estado muda.
pub struct MotionNotifier {
    /// `None` = nunca observado
    last: Mutex<Option<Option<bool>>>,
    indicator: Mutex<Option<Box<dyn Indicator>>>,
}

impl MotionNotifier {
    pub fn new(indicator: Option<Box<dyn Indicator>>) -> Self {
        Self {
            last: Mutex::new(None),
            indicator: Mutex::new(indicator),
        }
    }

    /// Registra um novo estado. Retorna `true` se houve transição.
    pub fn update(&self, state: Option<bool>) -> bool {
        {
            let mut last = self.last.lock().unwrap_or_else(|p| p.into_inner());
            if *last == Some(state) {
                return false;
            }
            *last = Some(state);
        }

        if let Some(indicator) = self
            .indicator
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .as_mut()
        {
            if let Err(e) = indicator.set(state == Some(true)) {
                debug!("LED indicador falhou: {e}");
            }
        }

        match state {
            Some(true) => info!("Movimento detectado"),
            Some(false) => info!("Movimento cessou"),
            None => info!("Estado de movimento desconhecido"),
        }
        true
    }

    /// Último estado registrado.
    #[cfg(test)]
    pub(crate) fn last(&self) -> Option<Option<bool>> {
        *self.last.lock().unwrap_or_else(|p| p.into_inner())
    }
}

// ──────────────────────────────────────────────
// Backends
// ──────────────────────────────────────────────

/// PIR em qualquer `InputPin`. A linha é aberta na primeira consulta e
/// liberada (drop) após falha de leitura ou junto com o backend.
pub struct PinMotion<P> {
    pin: LazyPin<P>,
}

impl<P: InputPin> PinMotion<P> {
    pub fn new(pin: LazyPin<P>) -> Self {
        Self { pin }
    }
}

impl<P: InputPin + Send> MotionBackend for PinMotion<P> {
    fn name(&self) -> &'static str {
        "pir-gpio"
    }

    fn query(&mut self) -> Result<bool, String> {
        self.pin
            .with(|p| p.is_high().map_err(|e| format!("Falha ao ler PIR: {e:?}")))
    }
}

/// Alternância determinística pela paridade do relógio.
pub struct SimulatedMotion {
    period_secs: u64,
}

impl SimulatedMotion {
    pub fn new(period_secs: u64) -> Self {
        Self {
            period_secs: period_secs.max(2),
        }
    }

    /// Movimento na primeira metade de cada período.
    pub fn state_at(&self, unix_secs: u64) -> bool {
        unix_secs % self.period_secs < self.period_secs / 2
    }
}

impl MotionBackend for SimulatedMotion {
    fn name(&self) -> &'static str {
        "simulated"
    }

    fn query(&mut self) -> Result<bool, String> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        Ok(self.state_at(now))
    }

    fn feeds_notifier(&self) -> bool {
        false
    }
}

/// LED em qualquer `OutputPin`; apagado e liberado no drop.
pub struct LedIndicator<P: OutputPin> {
    pin: LazyPin<P>,
}

impl<P: OutputPin> LedIndicator<P> {
    pub fn new(pin: LazyPin<P>) -> Self {
        Self { pin }
    }
}

impl<P: OutputPin + Send> Indicator for LedIndicator<P> {
    fn set(&mut self, on: bool) -> Result<(), String> {
        self.pin
            .with(|p| p.set_state(PinState::from(on)).map_err(|e| format!("{e:?}")))
    }
}

impl<P: OutputPin> Drop for LedIndicator<P> {
    fn drop(&mut self) {
        if let Some(mut pin) = self.pin.take() {
            let _ = pin.set_low();
        }
    }
}

// ──────────────────────────────────────────────
// Testes
// ──────────────────────────────────────────────
