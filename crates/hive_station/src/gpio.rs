//! Linhas GPIO do Raspberry Pi via `rppal`, vistas pelos traits
//! `embedded-hal` (`InputPin` para o PIR, `OutputPin` para o LED).
//!
//! [`LazyPin`] abre a linha na primeira utilização e a descarta após
//! uma falha, para que a próxima chamada reabra.

use embedded_hal::digital::{InputPin, OutputPin};
use rppal::gpio::Gpio;

/// `true` se o controlador GPIO do Pi está acessível.
pub fn available() -> bool {
    Gpio::new().is_ok()
}

/// Abre `pin` (BCM) como entrada.
pub fn open_input(pin: u8) -> Result<impl InputPin + Send + 'static, String> {
    let gpio = Gpio::new().map_err(|e| e.to_string())?;
    Ok(gpio.get(pin).map_err(|e| e.to_string())?.into_input())
}

/// Abre `pin` (BCM) como saída, inicialmente em nível baixo.
pub fn open_output(pin: u8) -> Result<impl OutputPin + Send + 'static, String> {
    let gpio = Gpio::new().map_err(|e| e.to_string())?;
    Ok(gpio.get(pin).map_err(|e| e.to_string())?.into_output_low())
}

type Opener<P> = Box<dyn FnMut() -> Result<P, String> + Send>;

/// Linha aberta sob demanda.
pub struct LazyPin<P> {
    open: Opener<P>,
    pin: Option<P>,
}

impl<P> LazyPin<P> {
    pub fn new(open: impl FnMut() -> Result<P, String> + Send + 'static) -> Self {
        Self {
            open: Box::new(open),
            pin: None,
        }
    }

    /// Executa `f` sobre a linha, abrindo-a se necessário.
    ///
    /// Se `f` falhar, a linha é liberada (drop) e reaberta na próxima vez.
    pub fn with<T>(&mut self, f: impl FnOnce(&mut P) -> Result<T, String>) -> Result<T, String> {
        let mut pin = match self.pin.take() {
            Some(pin) => pin,
            None => (self.open)()?,
        };
        let out = f(&mut pin)?;
        self.pin = Some(pin);
        Ok(out)
    }

    pub fn is_open(&self) -> bool {
        self.pin.is_some()
    }

    /// Retira a linha aberta, se houver.
    pub fn take(&mut self) -> Option<P> {
        self.pin.take()
    }
}
