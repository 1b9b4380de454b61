//! DTU application core
//!
//! [`Dtu`] owns the scheduler, the inverter registry and both radio
//! front-ends. One call to [`Dtu::tick`] runs, in order:
//!
//! 1. the scheduler, dispatching every [`Task`] that came due
//! 2. the radio polls, folding each [`PollResult`] into the addressed link
//! 3. the consumer, validating and forwarding one frame per radio
//! 4. the evaluation of a finished exchange (retransmit or account)
//!
//! Nothing here blocks. Telemetry leaves through the [`PayloadSink`].

use crate::config::{DtuConfig, SCHEDULER_CAPACITY, SUNRISE_RETRY_S};
use crate::inverter::{InverterLink, Inverters, RegistryError};
use crate::packet::RadioPacket;
use crate::radio::cmt::CHANNEL_SPACING_KHZ;
use crate::radio::queue::FrameSet;
use crate::radio::{PollResult, Radio, RadioError};
use crate::scheduler::{Scheduler, SchedulerError};
use crate::sun::{self, SunWindow, SECONDS_PER_DAY};
use crate::types::{DevControl, InfoCmd, RadioBackend};

#[cfg(feature = "embedded")]
use defmt::{debug, info, warn};
#[cfg(not(feature = "embedded"))]
use log::{debug, info, warn};

const EV_SEND: &str = "tickSend";
const EV_SUN: &str = "calc sunrise";
const EV_COMM: &str = "comm gate";
const EV_ZERO: &str = "zero values";
const EV_STATS: &str = "stats";

/// Work items dispatched by the scheduler
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Task {
    /// Poll the next inverter
    Send,
    /// Recompute the sun window
    CalcSunrise,
    /// Re-evaluate the day/night gate
    CommGate,
    /// Publish zero values for silent inverters
    ZeroValues,
    /// Log statistics
    Stats,
}

/// Consumer of decoded traffic
pub trait PayloadSink {
    /// A frame with a valid CRC8 arrived from a registered inverter
    fn on_frame(&mut self, iv: &InverterLink, frame: &RadioPacket);

    /// The inverter went quiet for the night
    fn on_zero_values(&mut self, iv: &InverterLink);

    /// A device control exchange ended
    fn on_command_result(&mut self, iv: &InverterLink, cmd: u8, ok: bool);
}

/// Link counters
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Statistics {
    /// Frames with a valid CRC8
    pub frames_received: u32,
    /// Frames failing the CRC8 check
    pub crc_failures: u32,
    /// Exchanges that completed
    pub complete: u32,
    /// Exchanges that ended with frames missing
    pub partial_failures: u32,
    /// Exchanges without any answer
    pub no_answer: u32,
    /// Single frame requests sent
    pub retransmits: u32,
    /// Valid frames from unknown addresses
    pub foreign_frames: u32,
    /// Frames lost to full queues
    pub queue_overflows: u32,
}

/// Request in flight
#[derive(Clone, Copy, Debug)]
struct Exchange {
    index: usize,
    backend: RadioBackend,
    frames: FrameSet,
    retransmits: u8,
    control: Option<DevControl>,
    radio_done: bool,
    started_ms: u32,
}

impl Exchange {
    const fn new(index: usize, backend: RadioBackend, control: Option<DevControl>, now_ms: u32) -> Self {
        Self {
            index,
            backend,
            frames: FrameSet::new(),
            retransmits: 0,
            control,
            radio_done: false,
            started_ms: now_ms,
        }
    }
}

fn radio_for<'r, A: Radio, B: Radio>(
    nrf: &'r mut A,
    cmt: &'r mut B,
    backend: RadioBackend,
) -> &'r mut (dyn Radio + 'r) {
    match backend {
        RadioBackend::Nrf => nrf,
        RadioBackend::Cmt => cmt,
    }
}

/// The cooperative DTU loop
pub struct Dtu<A: Radio, B: Radio, S: PayloadSink> {
    config: DtuConfig,
    scheduler: Scheduler<Task, SCHEDULER_CAPACITY>,
    inverters: Inverters,
    nrf: A,
    cmt: B,
    sink: S,
    sun: Option<SunWindow>,
    stats: Statistics,
    cursor: usize,
    exchange: Option<Exchange>,
}

impl<A: Radio, B: Radio, S: PayloadSink> Dtu<A, B, S> {
    /// Create the core; call [`Dtu::setup`] before the first tick
    pub fn new(config: DtuConfig, nrf: A, cmt: B, sink: S) -> Self {
        Self {
            config,
            scheduler: Scheduler::new(),
            inverters: Inverters::new(),
            nrf,
            cmt,
            sink,
            sun: None,
            stats: Statistics::default(),
            cursor: 0,
            exchange: None,
        }
    }

    /// Start the clock and register the base events
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::Full`] when the events do not fit.
    pub fn setup(&mut self, now_ms: u32) -> Result<(), SchedulerError> {
        self.scheduler = Scheduler::starting_at(now_ms);
        self.register_base_events()?;
        info!(
            "DTU ready: {} inverter(s), nrf {}, cmt {}",
            self.inverters.len(),
            self.nrf.is_chip_connected(),
            self.cmt.is_chip_connected()
        );
        Ok(())
    }

    fn register_base_events(&mut self) -> Result<(), SchedulerError> {
        self.scheduler.once(EV_SEND, 0, Task::Send)?;
        if self.config.sun.is_configured() {
            self.scheduler.once(EV_SUN, 0, Task::CalcSunrise)?;
        }
        self.scheduler.every_minute(EV_STATS, Task::Stats)
    }

    /// Register an inverter
    ///
    /// # Errors
    ///
    /// Returns an error when the registry is full or the serial is known.
    pub fn add_inverter(&mut self, config: crate::config::InverterConfig) -> Result<u8, RegistryError> {
        let serial = config.serial;
        let index = self.inverters.add(config)?;
        info!("inverter {} registered: {:?}", index, serial);
        Ok(index)
    }

    /// Run one loop iteration
    pub fn tick(&mut self, now_ms: u32) {
        for task in self.scheduler.tick(now_ms) {
            self.dispatch(task, now_ms);
        }
        self.poll_radios(now_ms);
        self.consume(RadioBackend::Nrf);
        self.consume(RadioBackend::Cmt);
        self.evaluate_exchange(now_ms);
    }

    fn dispatch(&mut self, task: Task, now_ms: u32) {
        match task {
            Task::Send => self.tick_send(now_ms),
            Task::CalcSunrise => self.calc_sunrise(),
            Task::CommGate => self.comm_gate(),
            Task::ZeroValues => self.zero_values(),
            Task::Stats => self.log_stats(),
        }
    }

    fn schedule(&mut self, result: Result<(), SchedulerError>) {
        if result.is_err() {
            warn!("scheduler full, event dropped");
        }
    }

    fn poll_radios(&mut self, now_ms: u32) {
        for backend in [RadioBackend::Nrf, RadioBackend::Cmt] {
            let result = radio_for(&mut self.nrf, &mut self.cmt, backend).poll(now_ms);
            if result.is_idle() {
                continue;
            }
            self.apply_poll(backend, &result);
        }
    }

    fn apply_poll(&mut self, backend: RadioBackend, result: &PollResult) {
        let Some(ex) = self.exchange.as_mut().filter(|ex| ex.backend == backend) else {
            return;
        };
        if let Some(link) = self.inverters.get_mut(ex.index) {
            link.apply(result);
        }
        if result.finished || result.timed_out {
            ex.radio_done = true;
        }
    }

    fn consume(&mut self, backend: RadioBackend) {
        let Some(frame) = radio_for(&mut self.nrf, &mut self.cmt, backend).frames().pop() else {
            return;
        };
        if !frame.crc_ok() {
            self.stats.crc_failures = self.stats.crc_failures.wrapping_add(1);
            debug!("CRC8 mismatch: {:?}", frame);
            return;
        }
        self.stats.frames_received = self.stats.frames_received.wrapping_add(1);

        let Some(index) = self.inverters.find_by_address(&frame.source()) else {
            self.stats.foreign_frames = self.stats.foreign_frames.wrapping_add(1);
            return;
        };
        if let Some(ex) = self.exchange.as_mut().filter(|ex| ex.index == index) {
            ex.frames.record(frame.frame_index());
        }
        let timestamp = self.scheduler.timestamp();
        if let Some(link) = self.inverters.get_mut(index) {
            link.last_rx_ts = timestamp;
            self.sink.on_frame(link, &frame);
        }
    }

    fn evaluate_exchange(&mut self, now_ms: u32) {
        let Some(mut ex) = self.exchange else {
            return;
        };
        if !ex.radio_done {
            return;
        }
        let radio = radio_for(&mut self.nrf, &mut self.cmt, ex.backend);
        if !radio.frames().is_empty() || radio.is_busy(now_ms) {
            return;
        }
        let Some(link) = self.inverters.get_mut(ex.index) else {
            self.exchange = None;
            return;
        };

        let legacy = link.generation().is_legacy();
        let complete = match ex.control {
            Some(_) => link.got_fragment,
            None if legacy => link.got_last_msg,
            None => ex.frames.is_complete(),
        };

        if complete {
            self.stats.complete = self.stats.complete.wrapping_add(1);
            match ex.control {
                Some(ctrl) => {
                    info!("{:?} accepted control {}", link.serial(), ctrl.code());
                    self.sink.on_command_result(link, ctrl.code(), true);
                    if !legacy && !link.enqueue_command(InfoCmd::SystemConfig) {
                        warn!("info queue full");
                    }
                }
                None => link.finish_queued_cmd(),
            }
            self.exchange = None;
            return;
        }

        if ex.control.is_none() && !legacy && link.got_fragment && ex.retransmits < self.config.max_retransmits {
            if let Some(missing) = ex.frames.missing().next() {
                debug!("{:?} requesting frame {}", link.serial(), missing);
                match radio.send_single_frame_request(link, missing, now_ms) {
                    Ok(()) => {
                        ex.retransmits += 1;
                        ex.radio_done = false;
                        self.stats.retransmits = self.stats.retransmits.wrapping_add(1);
                        self.exchange = Some(ex);
                        return;
                    }
                    Err(e) => warn!("retransmit request failed: {}", e),
                }
            }
        }

        if link.got_fragment {
            self.stats.partial_failures = self.stats.partial_failures.wrapping_add(1);
            warn!(
                "{:?} incomplete response, {} frame(s)",
                link.serial(),
                ex.frames.received_count()
            );
        } else {
            self.stats.no_answer = self.stats.no_answer.wrapping_add(1);
            link.rotate_tx_channel();
            info!("{:?} no answer", link.serial());
        }
        match ex.control {
            Some(ctrl) => {
                self.sink.on_command_result(link, ctrl.code(), false);
                if link.pending_control().is_none() {
                    link.set_device_control(ctrl);
                }
            }
            // a failed request is not repeated, the default request resumes
            None => link.finish_queued_cmd(),
        }
        self.exchange = None;
    }

    fn tick_send(&mut self, now_ms: u32) {
        let interval = self.config.send_interval();
        let rearm = self.scheduler.once(EV_SEND, interval, Task::Send);
        self.schedule(rearm);

        let timestamp = self.scheduler.timestamp();
        if timestamp == 0 {
            debug!("time not set, skip send");
            return;
        }

        if let Some(ex) = self.exchange {
            if now_ms.wrapping_sub(ex.started_ms) < interval.saturating_mul(1000) {
                debug!("exchange in progress, skip send");
                return;
            }
            warn!("exchange with inverter {} abandoned", ex.index);
            self.stats.no_answer = self.stats.no_answer.wrapping_add(1);
            if ex.control.is_none() {
                if let Some(link) = self.inverters.get_mut(ex.index) {
                    link.finish_queued_cmd();
                }
            }
            self.exchange = None;
        }

        let Some(index) = self.next_inverter() else {
            return;
        };
        let Some(link) = self.inverters.get_mut(index) else {
            return;
        };
        let backend = link.backend();
        let radio = radio_for(&mut self.nrf, &mut self.cmt, backend);

        if let Some(ctrl) = link.take_device_control() {
            info!("{:?} device control {:?}", link.serial(), ctrl);
            match radio.send_control_packet(link, ctrl, now_ms, false) {
                Ok(()) => self.exchange = Some(Exchange::new(index, backend, Some(ctrl), now_ms)),
                Err(RadioError::Encode(e)) => {
                    warn!("control dropped: {}", e);
                    self.sink.on_command_result(link, ctrl.code(), false);
                }
                Err(e) => {
                    warn!("control send failed: {}", e);
                    link.set_device_control(ctrl);
                }
            }
            return;
        }

        let cmd = link.queued_cmd();
        debug!("{:?} request {:?}", link.serial(), cmd);
        match radio.send_info_request(link, cmd, timestamp, 0, now_ms, false) {
            Ok(()) => self.exchange = Some(Exchange::new(index, backend, None, now_ms)),
            Err(e) => warn!("info request failed: {}", e),
        }
    }

    fn next_inverter(&mut self) -> Option<usize> {
        let count = self.inverters.len();
        for step in 0..count {
            let index = (self.cursor + step) % count;
            let Some(link) = self.inverters.get(index) else {
                continue;
            };
            let radio_ok = match link.backend() {
                RadioBackend::Nrf => self.nrf.is_enabled(),
                RadioBackend::Cmt => self.cmt.is_enabled(),
            };
            if link.config.enabled && link.comm_enabled && radio_ok {
                self.cursor = (index + 1) % count;
                return Some(index);
            }
        }
        None
    }

    fn calc_sunrise(&mut self) {
        let timestamp = self.scheduler.timestamp();
        if timestamp == 0 {
            let retry = self.scheduler.once(EV_SUN, SUNRISE_RETRY_S, Task::CalcSunrise);
            self.schedule(retry);
            return;
        }
        let cfg = self.config.sun;
        let times = sun::calculate(timestamp, cfg.latitude, cfg.longitude);
        let window = SunWindow::new(times, &cfg);
        info!("sunrise {} sunset {}", times.sunrise, times.sunset);
        self.sun = Some(window);

        // next local midnight
        let tz = sun::timezone_offset_s(cfg.longitude);
        let local = timestamp.saturating_add_signed(tz);
        let midnight = (local / SECONDS_PER_DAY + 1) * SECONDS_PER_DAY;
        let next = midnight.saturating_add_signed(-tz).saturating_add(SUNRISE_RETRY_S);
        let again = self.scheduler.once_at(EV_SUN, next, Task::CalcSunrise);
        self.schedule(again);

        self.comm_gate();
    }

    fn comm_gate(&mut self) {
        let timestamp = self.scheduler.timestamp();
        let night_off = self.config.sun.disable_night_comm;
        let mut went_dark = false;
        for link in self.inverters.iter_mut() {
            let always_on = !night_off || link.config.ignore_night;
            let enabled = sun::comm_enabled(timestamp, self.sun.as_ref(), always_on);
            if link.comm_enabled != enabled {
                info!("{:?} communication {}", link.serial(), enabled);
                went_dark |= !enabled;
                link.comm_enabled = enabled;
            }
        }

        if went_dark && self.config.reset_values_at_night {
            let zero = self.scheduler.once(EV_ZERO, self.config.send_interval(), Task::ZeroValues);
            self.schedule(zero);
        }

        if let Some(boundary) = self.sun.as_ref().and_then(|w| sun::next_boundary(timestamp, w)) {
            let gate = self.scheduler.once_at(EV_COMM, boundary, Task::CommGate);
            self.schedule(gate);
        }
    }

    fn zero_values(&mut self) {
        for link in self.inverters.iter().filter(|l| !l.comm_enabled) {
            self.sink.on_zero_values(link);
        }
    }

    fn log_stats(&mut self) {
        self.stats.queue_overflows = self
            .nrf
            .frames()
            .dropped()
            .wrapping_add(self.cmt.frames().dropped());
        let s = self.stats;
        info!(
            "stats: rx {} crc {} ok {} partial {} none {} retx {}",
            s.frames_received, s.crc_failures, s.complete, s.partial_failures, s.no_answer, s.retransmits
        );
    }

    /// Send on the next loop iteration
    pub fn request_send(&mut self) {
        let now = self.scheduler.once(EV_SEND, 0, Task::Send);
        self.schedule(now);
    }

    /// Queue an info request for an inverter; false when unknown or full
    pub fn enqueue_command(&mut self, index: usize, cmd: InfoCmd) -> bool {
        self.inverters
            .get_mut(index)
            .is_some_and(|link| link.enqueue_command(cmd))
    }

    /// Request a device control command and send soon
    pub fn set_device_control(&mut self, index: usize, ctrl: DevControl) -> bool {
        let Some(link) = self.inverters.get_mut(index) else {
            return false;
        };
        link.set_device_control(ctrl);
        self.request_send();
        true
    }

    /// Move a sub-GHz inverter to another channel
    ///
    /// # Errors
    ///
    /// Returns [`RadioError::HardwareAbsent`] for an unknown inverter and
    /// whatever the front-end reports otherwise.
    pub fn change_frequency(&mut self, index: usize, to_khz: u32, now_ms: u32) -> Result<(), RadioError> {
        let link = self.inverters.get_mut(index).ok_or(RadioError::HardwareAbsent)?;
        let base_khz = u32::from(self.cmt.base_freq_mhz()) * 1000;
        let from_khz = base_khz + u32::from(link.config.frequency_channel) * CHANNEL_SPACING_KHZ;
        self.cmt.switch_frequency(link, from_khz, to_khz, now_ms)
    }

    /// Set the wall clock; the first sync computes the sun window
    pub fn set_timestamp(&mut self, epoch: u32) {
        let first = self.scheduler.timestamp() == 0;
        self.scheduler.set_timestamp(epoch);
        if first && epoch != 0 && self.config.sun.is_configured() {
            let calc = self.scheduler.once(EV_SUN, 0, Task::CalcSunrise);
            self.schedule(calc);
        }
    }

    /// Drop one-shot events and start over after a network reconnect
    pub fn on_reconnect(&mut self) {
        self.scheduler.reset();
        let base = self.register_base_events();
        self.schedule(base);
    }

    /// Check whether a front-end answered during setup
    #[must_use]
    pub fn is_chip_connected(&self, backend: RadioBackend) -> bool {
        match backend {
            RadioBackend::Nrf => self.nrf.is_chip_connected(),
            RadioBackend::Cmt => self.cmt.is_chip_connected(),
        }
    }

    /// Usable sub-GHz range (MHz)
    #[must_use]
    pub fn freq_range_mhz(&self) -> (u16, u16) {
        self.cmt.freq_range_mhz()
    }

    /// Check if any enabled inverter may be polled now
    #[must_use]
    pub fn any_comm_enabled(&self) -> bool {
        self.inverters.iter().any(|l| l.config.enabled && l.comm_enabled)
    }

    /// Epoch seconds, 0 while unset
    #[must_use]
    pub const fn timestamp(&self) -> u32 {
        self.scheduler.timestamp()
    }

    /// Counters
    #[must_use]
    pub const fn statistics(&self) -> &Statistics {
        &self.stats
    }

    /// Current sun window
    #[must_use]
    pub const fn sun_window(&self) -> Option<&SunWindow> {
        self.sun.as_ref()
    }

    /// Registry
    #[must_use]
    pub const fn inverters(&self) -> &Inverters {
        &self.inverters
    }

    /// Mutable registry
    pub fn inverters_mut(&mut self) -> &mut Inverters {
        &mut self.inverters
    }

    /// Scheduler
    #[must_use]
    pub const fn scheduler(&self) -> &Scheduler<Task, SCHEDULER_CAPACITY> {
        &self.scheduler
    }

    /// Mutable scheduler, for events owned by the embedding application
    pub fn scheduler_mut(&mut self) -> &mut Scheduler<Task, SCHEDULER_CAPACITY> {
        &mut self.scheduler
    }

    /// 2.4 GHz front-end
    pub fn nrf_mut(&mut self) -> &mut A {
        &mut self.nrf
    }

    /// Sub-GHz front-end
    pub fn cmt_mut(&mut self) -> &mut B {
        &mut self.cmt
    }

    /// Telemetry sink
    #[must_use]
    pub const fn sink(&self) -> &S {
        &self.sink
    }

    /// Exchange in progress
    #[must_use]
    pub fn is_exchange_active(&self) -> bool {
        self.exchange.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::radio::NoRadio;

    #[derive(Default)]
    struct Count {
        frames: usize,
    }

    impl PayloadSink for Count {
        fn on_frame(&mut self, _iv: &InverterLink, _frame: &RadioPacket) {
            self.frames += 1;
        }
        fn on_zero_values(&mut self, _iv: &InverterLink) {}
        fn on_command_result(&mut self, _iv: &InverterLink, _cmd: u8, _ok: bool) {}
    }

    #[test]
    fn test_base_events() {
        let mut dtu = Dtu::new(DtuConfig::default(), NoRadio::new(), NoRadio::new(), Count::default());
        dtu.setup(0).unwrap();
        assert!(dtu.scheduler().is_scheduled(EV_SEND));
        assert!(dtu.scheduler().is_scheduled(EV_STATS));
        assert!(!dtu.scheduler().is_scheduled(EV_SUN));
    }

    #[test]
    fn test_reconnect_keeps_periodic_events() {
        let mut dtu = Dtu::new(DtuConfig::default(), NoRadio::new(), NoRadio::new(), Count::default());
        dtu.setup(0).unwrap();
        dtu.tick(1000);
        assert!(dtu.scheduler().is_scheduled(EV_SEND));
        dtu.on_reconnect();
        assert_eq!(dtu.scheduler().trigger(EV_SEND), Some(crate::scheduler::Trigger::After(0)));
        assert!(dtu.scheduler().is_scheduled(EV_STATS));
    }

    #[test]
    fn test_no_send_without_time() {
        let mut dtu = Dtu::new(DtuConfig::default(), NoRadio::new(), NoRadio::new(), Count::default());
        dtu.setup(0).unwrap();
        dtu.add_inverter(crate::config::InverterConfig::default()).unwrap();
        dtu.tick(1000);
        assert!(!dtu.is_exchange_active());
        assert_eq!(dtu.sink().frames, 0);
    }
}
