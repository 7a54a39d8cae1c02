//! SX1276 transceiver over `lora-phy`
//!
//! The module sits on SPI2 with NSS on GPIO18, reset on GPIO23 and DIO0 on
//! GPIO26. Transmission uses PA_BOOST and the private sync word, the same
//! air format the gateway listens for.

use embassy_time::Delay;
use embedded_hal_bus::spi::ExclusiveDevice;
use esp_hal::Async;
use esp_hal::gpio::{Input, Output};
use esp_hal::spi::master::Spi;
use log::{debug, info};
use lora_phy::iv::GenericSx127xInterfaceVariant;
use lora_phy::mod_params::{
    Bandwidth as PhyBandwidth, CodingRate as PhyCodingRate, ModulationParams, PacketParams,
    SpreadingFactor as PhySpreadingFactor,
};
use lora_phy::LoRa;
use lora_phy::sx127x::{self, Sx127x, Sx1276};

use lorasense_core::config::{Bandwidth, CodingRate, RadioSettings, SpreadingFactor};
use lorasense_core::radio::{MAX_PACKET_LEN, Radio, RadioError};

pub type LoraSpi = ExclusiveDevice<Spi<'static, Async>, Output<'static>, Delay>;
pub type LoraInterface = GenericSx127xInterfaceVariant<Output<'static>, Input<'static>>;
type LoraDriver = LoRa<Sx127x<LoraSpi, LoraInterface, Sx1276>, Delay>;

struct TxParams {
    modulation: ModulationParams,
    packet: PacketParams,
}

/// [`Radio`] backed by the on-board SX1276.
///
/// The driver is built on the first [`Radio::begin`]; until then the bus and
/// control pins are held unused. A failed driver start consumes them, after
/// which only a reset brings the transceiver back (see [`LoraRadio::is_lost`]).
pub struct LoraRadio {
    parts: Option<(LoraSpi, LoraInterface)>,
    lora: Option<LoraDriver>,
    params: Option<TxParams>,
    settings: RadioSettings,
}

impl LoraRadio {
    pub fn new(spi: LoraSpi, interface: LoraInterface, settings: RadioSettings) -> Self {
        Self {
            parts: Some((spi, interface)),
            lora: None,
            params: None,
            settings,
        }
    }

    /// The bus and pins went down with a failed driver start.
    pub fn is_lost(&self) -> bool {
        self.parts.is_none() && self.lora.is_none()
    }
}

fn spreading_factor(sf: SpreadingFactor) -> PhySpreadingFactor {
    match sf {
        SpreadingFactor::Sf7 => PhySpreadingFactor::_7,
        SpreadingFactor::Sf8 => PhySpreadingFactor::_8,
        SpreadingFactor::Sf9 => PhySpreadingFactor::_9,
        SpreadingFactor::Sf10 => PhySpreadingFactor::_10,
        SpreadingFactor::Sf11 => PhySpreadingFactor::_11,
        SpreadingFactor::Sf12 => PhySpreadingFactor::_12,
    }
}

fn bandwidth(bw: Bandwidth) -> PhyBandwidth {
    match bw {
        Bandwidth::Khz62 => PhyBandwidth::_62KHz,
        Bandwidth::Khz125 => PhyBandwidth::_125KHz,
        Bandwidth::Khz250 => PhyBandwidth::_250KHz,
        Bandwidth::Khz500 => PhyBandwidth::_500KHz,
    }
}

fn coding_rate(cr: CodingRate) -> PhyCodingRate {
    match cr {
        CodingRate::Cr4_5 => PhyCodingRate::_4_5,
        CodingRate::Cr4_6 => PhyCodingRate::_4_6,
        CodingRate::Cr4_7 => PhyCodingRate::_4_7,
        CodingRate::Cr4_8 => PhyCodingRate::_4_8,
    }
}

impl Radio for LoraRadio {
    async fn begin(&mut self) -> Result<(), RadioError> {
        if self.lora.is_none() {
            let (spi, interface) = self.parts.take().ok_or(RadioError::Init(
                "transceiver lost after an earlier failed start",
            ))?;
            let config = sx127x::Config {
                chip: Sx1276,
                tcxo_used: false,
                tx_boost: true,
                rx_boost: false,
            };
            // Private sync word, matching the receiver
            let lora = LoRa::new(Sx127x::new(spi, interface, config), false, Delay)
                .await
                .map_err(|e| {
                    log::error!("SX1276 init error: {:?}", e);
                    RadioError::Init("SX1276 did not respond")
                })?;
            self.lora = Some(lora);
        }
        if self.params.is_some() {
            return Ok(());
        }

        let settings = &self.settings;
        let Some(lora) = self.lora.as_mut() else {
            return Err(RadioError::NotReady);
        };
        let modulation = lora
            .create_modulation_params(
                spreading_factor(settings.spreading_factor),
                bandwidth(settings.bandwidth),
                coding_rate(settings.coding_rate),
                settings.frequency_hz,
            )
            .map_err(|e| {
                log::error!("Modulation rejected: {:?}", e);
                RadioError::Init("modulation parameters rejected")
            })?;
        let packet = lora
            .create_tx_packet_params(
                settings.preamble_len,
                false,
                settings.crc_on,
                false,
                &modulation,
            )
            .map_err(|e| {
                log::error!("Packet parameters rejected: {:?}", e);
                RadioError::Init("packet parameters rejected")
            })?;

        info!(
            "LoRa up at {} Hz, SF{}, {} dBm",
            settings.frequency_hz,
            settings.spreading_factor.value(),
            settings.tx_power_dbm
        );
        self.params = Some(TxParams { modulation, packet });
        Ok(())
    }

    async fn transmit(&mut self, packet: &[u8]) -> Result<(), RadioError> {
        if packet.len() > MAX_PACKET_LEN {
            return Err(RadioError::TooLarge(packet.len()));
        }
        let power = self.settings.tx_power_dbm as i32;
        let (Some(lora), Some(params)) = (self.lora.as_mut(), self.params.as_mut()) else {
            return Err(RadioError::NotReady);
        };

        lora.prepare_for_tx(&params.modulation, &mut params.packet, power, packet)
            .await
            .map_err(|e| {
                log::error!("TX setup error: {:?}", e);
                RadioError::Transmit("could not load the FIFO")
            })?;
        lora.tx().await.map_err(|e| {
            log::error!("TX error: {:?}", e);
            RadioError::Transmit("transmission did not complete")
        })?;

        debug!("Sent {} bytes", packet.len());
        Ok(())
    }

    async fn sleep(&mut self) -> Result<(), RadioError> {
        let Some(lora) = self.lora.as_mut() else {
            // Never started, the chip is still in its reset state
            return Ok(());
        };
        lora.sleep(false).await.map_err(|e| {
            log::error!("Sleep error: {:?}", e);
            RadioError::Sleep("SX1276 did not accept the sleep command")
        })
    }
}
