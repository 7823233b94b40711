use anyhow::Context;
use cpal::Device;
use cpal::traits::{DeviceTrait, HostTrait};

fn get_host() -> cpal::Host {
    cpal::default_host()
}

fn find_device(
    devices: impl Iterator<Item = Device>,
    default: Option<Device>,
    device_name: Option<&str>,
) -> anyhow::Result<Device> {
    let Some(target) = device_name else {
        return default.context("no default device");
    };
    devices
        .into_iter()
        .find(|device| device.name().is_ok_and(|name| name == target))
        .with_context(|| format!("no device named {:?}", target))
}

pub fn get_or_default_input(device_name: Option<&str>) -> anyhow::Result<Device> {
    let host = get_host();
    tracing::debug!("Host: {:?}", host.id());
    find_device(host.input_devices()?, host.default_input_device(), device_name)
}

pub fn get_or_default_output(device_name: Option<&str>) -> anyhow::Result<Device> {
    let host = get_host();
    tracing::debug!("Host: {:?}", host.id());
    find_device(host.output_devices()?, host.default_output_device(), device_name)
}

fn describe(
    device: &Device,
    config: cpal::SupportedStreamConfig,
    default_name: Option<&str>,
) -> Option<String> {
    let name = device.name().ok()?;
    let mut d = format!(" * {}({}ch, {}hz)", name, config.channels(), config.sample_rate().0);
    if Some(name.as_str()) == default_name {
        d.push_str(" [default]");
    }
    Some(d)
}

pub fn get_available_inputs() -> anyhow::Result<String> {
    let host = get_host();
    let default_name = host.default_input_device().and_then(|d| d.name().ok());
    let names: Vec<String> = host
        .input_devices()?
        .filter_map(|device| {
            let config = device.default_input_config().ok()?;
            describe(&device, config, default_name.as_deref())
        })
        .collect();
    Ok(names.join("\n"))
}

pub fn get_available_outputs() -> anyhow::Result<String> {
    let host = get_host();
    let default_name = host.default_output_device().and_then(|d| d.name().ok());
    let names: Vec<String> = host
        .output_devices()?
        .filter_map(|device| {
            let config = device.default_output_config().ok()?;
            describe(&device, config, default_name.as_deref())
        })
        .collect();
    Ok(names.join("\n"))
}
