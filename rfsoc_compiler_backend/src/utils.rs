use std::time::Instant;

/// Wall-clock stopwatch for timing compile and acquisition phases.
pub struct TickTimer {
    last: Instant,
}

impl Default for TickTimer {
    fn default() -> Self {
        Self::new()
    }
}

impl TickTimer {
    pub fn new() -> Self {
        Self {
            last: Instant::now(),
        }
    }

    /// Returns milliseconds since the previous tick (or construction) and restarts.
    pub fn tick(&mut self) -> f64 {
        let now = Instant::now();
        let diff = now.duration_since(self.last).as_secs_f64() * 1e3;
        self.last = now;
        diff
    }

    /// Like [`TickTimer::tick`], additionally reporting the lap at debug level.
    pub fn tick_log(&mut self, msg: &str) -> f64 {
        let diff = self.tick();
        log::debug!("{}: {:.3} ms", msg, diff);
        diff
    }
}

/// Formats a trigger mask as grouped binary, DAC bits on the right.
pub fn fmt_mask(mask: u32) -> String {
    format!("{:#010x} (adc {:08b} | dac {:016b})", mask, mask >> 16, mask & 0xffff)
}

#[cfg(test)]
mod test {
    use crate::utils::*;

    #[test]
    fn tick_is_monotonic() {
        let mut timer = TickTimer::new();
        std::thread::sleep(std::time::Duration::from_millis(2));
        assert!(timer.tick() >= 2.0);
        assert!(timer.tick_log("second") >= 0.0);
    }

    #[test]
    fn mask_format() {
        assert_eq!(
            fmt_mask(0x0001_0003),
            "0x00010003 (adc 00000001 | dac 0000000000000011)"
        );
    }
}
