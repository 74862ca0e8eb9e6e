//! ADC1 bank multiplexed across the three capture inputs.

use capture_core::channel::{AdcChannel, CHANNEL_COUNT};
use capture_core::sampler::AnalogSource;
use embassy_stm32::Peri;
use embassy_stm32::adc::{Adc, AdcChannel as _, AnyAdcChannel, Resolution, SampleTime};
use embassy_stm32::peripherals::{ADC1, PA0, PA1, PA4};

/// Conversion time must stay well under the 80 µs sampling period.
const SAMPLE_TIME: SampleTime = SampleTime::CYCLES39_5;

pub struct MuxedAdc<'d> {
    adc: Adc<'d, ADC1>,
    inputs: [AnyAdcChannel<ADC1>; CHANNEL_COUNT],
}

impl<'d> MuxedAdc<'d> {
    /// Binds AIN0..AIN2 to PA0, PA1 and PA4.
    pub fn new(
        adc: Peri<'d, ADC1>,
        ain0: Peri<'d, PA0>,
        ain1: Peri<'d, PA1>,
        ain2: Peri<'d, PA4>,
    ) -> Self {
        let mut adc = Adc::new(adc);
        adc.set_resolution(Resolution::BITS12);
        adc.set_sample_time(SAMPLE_TIME);
        Self {
            adc,
            inputs: [ain0.degrade_adc(), ain1.degrade_adc(), ain2.degrade_adc()],
        }
    }
}

impl AnalogSource for MuxedAdc<'_> {
    fn read_raw(&mut self, channel: AdcChannel) -> u16 {
        let input = &mut self.inputs[usize::from(channel.index())];
        self.adc.blocking_read(input)
    }
}
