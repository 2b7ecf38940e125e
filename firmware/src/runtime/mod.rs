use core::cell::RefCell;

use cortex_m::interrupt;
use cortex_m::register::primask;
use critical_section::{self, RawRestoreState};
use defmt_rtt as _;
use embassy_executor::Spawner;
use embassy_stm32 as hal;
use embassy_stm32::gpio::Flex;
use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use embassy_sync::signal::Signal;
use embassy_time::{Duration, Instant, TICK_HZ};
use hx711_core::clock::{ClockConfig, Tick};
use hx711_core::driver::Hx711Driver;
use hx711_core::protocol::commands::CommandExecutor;
use static_cell::StaticCell;

use crate::hw::{BOARD_PIN_COUNT, BOARD_PINS, BoardGpio};
use crate::link::LinkFrame;
use crate::status::LinkCounters;
use crate::usb;

mod acquisition_task;
mod link_task;
mod usb_task;

critical_section::set_impl!(InterruptCriticalSection);

struct InterruptCriticalSection;

unsafe impl critical_section::Impl for InterruptCriticalSection {
    unsafe fn acquire() -> RawRestoreState {
        let primask = primask::read();
        interrupt::disable();
        primask.is_active()
    }

    unsafe fn release(restore_state: RawRestoreState) {
        if restore_state {
            unsafe {
                interrupt::enable();
            }
        }
    }
}

/// Driver tick rate; the core works on the low 32 bits of the embassy clock.
#[allow(clippy::cast_possible_truncation, clippy::cast_lossless)]
const CLOCK_HZ: u32 = {
    assert!(TICK_HZ <= u32::MAX as u64);
    TICK_HZ as u32
};

const LINK_RX_DEPTH: usize = 8;
const LINK_TX_DEPTH: usize = 16;

/// Inbound traffic from the USB task to the line session.
pub(super) enum LinkInput {
    Connected,
    Disconnected,
    Data(LinkFrame),
}

/// Everything a driver call needs, guarded by one critical-section lock.
pub(super) struct Acquisition {
    executor: CommandExecutor<Hx711Driver>,
    gpio: BoardGpio<'static>,
}

impl Acquisition {
    fn new(gpio: BoardGpio<'static>) -> Self {
        Self {
            executor: CommandExecutor::new(Hx711Driver::new(ClockConfig::new(CLOCK_HZ))),
            gpio,
        }
    }
}

pub(super) type SharedAcquisition = Mutex<CriticalSectionRawMutex, RefCell<Acquisition>>;

pub(super) static LINK_RX: Channel<CriticalSectionRawMutex, LinkInput, LINK_RX_DEPTH> =
    Channel::new();
pub(super) static LINK_TX: Channel<CriticalSectionRawMutex, LinkFrame, LINK_TX_DEPTH> =
    Channel::new();
/// Raised whenever a command may have moved the earliest wake.
pub(super) static WAKE_CHANGED: Signal<CriticalSectionRawMutex, ()> = Signal::new();
pub(super) static LINK_COUNTERS: LinkCounters = LinkCounters::new();

static ACQUISITION: StaticCell<SharedAcquisition> = StaticCell::new();
static USB_STORAGE: StaticCell<usb::UsbDeviceStorage> = StaticCell::new();

/// Wrapping 32-bit view of the embassy tick counter.
#[allow(clippy::cast_possible_truncation)]
pub(super) fn tick_at(instant: Instant) -> Tick {
    Tick::new(instant.as_ticks() as u32)
}

/// Maps a driver wake back onto the 64-bit embassy timeline.
///
/// Wakes already in the past resolve to `now`.
pub(super) fn instant_for(wake: Tick, now: Instant) -> Instant {
    let now_tick = tick_at(now);
    if wake.is_before(now_tick) {
        return now;
    }
    now + Duration::from_ticks(u64::from(wake - now_tick))
}

#[embassy_executor::main]
pub async fn main(spawner: Spawner) {
    let config = hal::Config::default();
    let hal::Peripherals {
        PA0,
        PA1,
        PA4,
        PA5,
        PA6,
        PA7,
        PB0,
        PB1,
        USB,
        PA11,
        PA12,
        ..
    } = hal::init(config);

    let gpio = BoardGpio::new([
        Flex::new(PA0),
        Flex::new(PA1),
        Flex::new(PA4),
        Flex::new(PA5),
        Flex::new(PA6),
        Flex::new(PA7),
        Flex::new(PB0),
        Flex::new(PB1),
    ]);
    for (pin, label) in BOARD_PINS.iter().enumerate() {
        defmt::debug!("hw: pin {} -> {}", pin, label);
    }
    defmt::info!(
        "hx711: {} board pins, driver clock {} Hz",
        BOARD_PIN_COUNT,
        CLOCK_HZ
    );

    let shared: &'static SharedAcquisition =
        ACQUISITION.init(Mutex::new(RefCell::new(Acquisition::new(gpio))));
    let storage = USB_STORAGE.init(usb::UsbDeviceStorage::new());

    spawner
        .spawn(usb_task::run(USB, PA12, PA11, storage))
        .expect("failed to spawn USB task");

    spawner
        .spawn(link_task::run(shared))
        .expect("failed to spawn link task");

    spawner
        .spawn(acquisition_task::run(shared))
        .expect("failed to spawn acquisition task");

    core::future::pending::<()>().await;
}
