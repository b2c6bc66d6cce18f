//! Logging shims.
//!
//! The crate logs through whichever backend feature is enabled (`log`,
//! `defmt` or `esp32-log`). With none of them the macros expand to code that
//! only borrows their arguments, so call sites stay warning-free.
#![allow(unused_macros)]

macro_rules! log_with {
    ($level:ident, $esp:literal, $s:literal $(, $x:expr)* $(,)?) => {
        {
            #[cfg(feature = "log")]
            ::log::$level!($s $(, $x)*);
            #[cfg(feature = "defmt")]
            ::defmt::$level!($s $(, $x)*);
            #[cfg(feature = "esp32-log")]
            ::esp_println::println!(concat!("[", $esp, "] dynamic_mqtt: ", $s) $(, $x)*);
            #[cfg(not(any(feature = "log", feature = "defmt", feature = "esp32-log")))]
            let _ = ($( & $x ),*);
        }
    };
}

macro_rules! trace {
    ($($arg:tt)*) => { log_with!(trace, "TRACE", $($arg)*) };
}

macro_rules! debug {
    ($($arg:tt)*) => { log_with!(debug, "DEBUG", $($arg)*) };
}

macro_rules! info {
    ($($arg:tt)*) => { log_with!(info, "INFO", $($arg)*) };
}

macro_rules! warn {
    ($($arg:tt)*) => { log_with!(warn, "WARN", $($arg)*) };
}

macro_rules! error {
    ($($arg:tt)*) => { log_with!(error, "ERROR", $($arg)*) };
}

/// Formats any `Debug` value, including under `defmt` where the value
/// itself may not implement `defmt::Format` (user transport errors).
pub(crate) struct Dbg<'a, T: ?Sized>(pub &'a T);

impl<T: core::fmt::Debug + ?Sized> core::fmt::Debug for Dbg<'_, T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        self.0.fmt(f)
    }
}

#[cfg(feature = "defmt")]
impl<T: core::fmt::Debug + ?Sized> defmt::Format for Dbg<'_, T> {
    fn format(&self, f: defmt::Formatter<'_>) {
        defmt::write!(f, "{}", defmt::Debug2Format(self.0))
    }
}
