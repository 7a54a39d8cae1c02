#![no_std]
#![no_main]
#![deny(
    clippy::mem_forget,
    reason = "mem::forget is generally not safe to do with esp_hal types, especially those \
    holding buffers for the duration of a data transfer."
)]
#![deny(clippy::large_stack_frames)]

use embassy_executor::Spawner;
use embassy_time::{Delay, Duration, Timer};
use embedded_hal_bus::spi::ExclusiveDevice;
use esp_hal::analog::adc::{Adc, AdcConfig, Attenuation};
use esp_hal::clock::CpuClock;
use esp_hal::gpio::{Flex, Input, InputConfig, Level, Output, OutputConfig};
use esp_hal::i2c::master::{Config as I2cConfig, I2c};
use esp_hal::rtc_cntl::Rtc;
use esp_hal::spi::Mode;
use esp_hal::spi::master::{Config as SpiConfig, Spi};
use esp_hal::time::Rate;
use esp_hal::timer::timg::TimerGroup;
use log::{info, warn};
use lora_phy::iv::GenericSx127xInterfaceVariant;

use lorasense_core::{NextWake, Node, run_cycle};
use lorasense_firmware::battery::AdcBattery;
use lorasense_firmware::display::OledDisplay;
use lorasense_firmware::led::BoardLed;
use lorasense_firmware::radio::LoraRadio;
use lorasense_firmware::sensor::DhtSensor;
use lorasense_firmware::{config, retained, sleep};

#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    rtt_target::rprintln!("PANIC: {}", info);
    loop {}
}

// This creates a default app-descriptor required by the esp-idf bootloader.
// For more information see: <https://docs.espressif.com/projects/esp-idf/en/stable/esp32/api-reference/system/app_image_format.html#application-description>
esp_bootloader_esp_idf::esp_app_desc!();

#[allow(
    clippy::large_stack_frames,
    reason = "it's not unusual to allocate larger buffers etc. in main"
)]
#[esp_rtos::main]
async fn main(_spawner: Spawner) -> ! {
    rtt_target::rtt_init_log!(log::LevelFilter::Info);

    let hal_config = esp_hal::Config::default().with_cpu_clock(CpuClock::max());
    let peripherals = esp_hal::init(hal_config);

    let timg0 = TimerGroup::new(peripherals.TIMG0);
    esp_rtos::start(timg0.timer0);

    sleep::log_wake_cause();
    let mut rtc = Rtc::new(peripherals.LPWR);

    let config = config::load();
    info!("{}", config.summary());
    let mut retained_state = retained::load();

    // 1. Status LED, off until the radio transmits
    let led = BoardLed::new(Output::new(
        peripherals.GPIO25,
        Level::Low,
        OutputConfig::default(),
    ));

    // 2. DHT22 data line
    let sensor = DhtSensor::new(Flex::new(peripherals.GPIO13));

    // 3. Battery divider
    let mut adc_config = AdcConfig::new();
    let battery_pin = adc_config.enable_pin(peripherals.GPIO35, Attenuation::_11dB);
    let battery = AdcBattery::new(Adc::new(peripherals.ADC1, adc_config), battery_pin);

    // 4. OLED
    let i2c = I2c::new(
        peripherals.I2C0,
        I2cConfig::default().with_frequency(Rate::from_khz(400)),
    )
    .expect("Failed to configure I2C")
    .with_sda(peripherals.GPIO21)
    .with_scl(peripherals.GPIO22);
    let display = OledDisplay::new(i2c);

    // 5. SX1276 on SPI2
    let spi_bus = Spi::new(
        peripherals.SPI2,
        SpiConfig::default()
            .with_frequency(Rate::from_mhz(8))
            .with_mode(Mode::_0),
    )
    .expect("Failed to configure SPI")
    .with_sck(peripherals.GPIO5)
    .with_mosi(peripherals.GPIO27)
    .with_miso(peripherals.GPIO19)
    .into_async();
    let nss = Output::new(peripherals.GPIO18, Level::High, OutputConfig::default());
    let spi_device = ExclusiveDevice::new(spi_bus, nss, Delay).expect("Failed to claim LoRa NSS");

    let reset = Output::new(peripherals.GPIO23, Level::High, OutputConfig::default());
    let dio0 = Input::new(peripherals.GPIO26, InputConfig::default());
    let interface = GenericSx127xInterfaceVariant::new(reset, dio0, None, None)
        .expect("Failed to set up LoRa control pins");
    let radio = LoraRadio::new(spi_device, interface, config.radio);

    let mut node = Node {
        sensor,
        battery,
        radio,
        display,
        led,
    };

    loop {
        let report = run_cycle(&mut node, &mut retained_state, &config, &mut Delay).await;
        retained::store(&retained_state);

        match report.next_wake {
            NextWake::DeepSleep(duration) => sleep::enter_deep_sleep(&mut rtc, duration),
            NextWake::Poll(interval) => {
                if node.radio.is_lost() {
                    // Deep-sleep wakes start from reset, a polling node has to ask for one
                    warn!("LoRa transceiver lost, resetting");
                    Timer::after(Duration::from_millis(interval.as_millis() as u64)).await;
                    esp_hal::system::software_reset();
                }
                Timer::after(Duration::from_millis(interval.as_millis() as u64)).await
            }
        }
    }
}
