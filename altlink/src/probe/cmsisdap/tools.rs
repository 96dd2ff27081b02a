use std::time::Duration;

use hidapi::HidApi;

use super::commands::CmsisDapDevice;
use crate::probe::{DebugProbeError, DebugProbeInfo};

/// Most CMSIS-DAP probes say something like "CMSIS-DAP" in their product string.
fn is_cmsis_dap(id: &str) -> bool {
    id.contains("CMSIS-DAP")
}

/// Finds all CMSIS-DAP v1 (HID) probes.
#[tracing::instrument(skip_all)]
pub fn list_cmsisdap_devices(api: &HidApi) -> Vec<DebugProbeInfo> {
    let probes: Vec<DebugProbeInfo> = api
        .device_list()
        .filter_map(get_cmsisdap_hid_info)
        .collect();

    tracing::debug!("Found {} CMSIS-DAP probes", probes.len());
    probes
}

/// Checks if a given HID device is a CMSIS-DAP v1 probe, returning Some(DebugProbeInfo) if so.
fn get_cmsisdap_hid_info(device: &hidapi::DeviceInfo) -> Option<DebugProbeInfo> {
    let prod_str = device.product_string().unwrap_or("");
    if !is_cmsis_dap(prod_str) {
        return None;
    }

    tracing::trace!("CMSIS-DAP device with USB path: {:?}", device.path());
    tracing::trace!("                product_string: {:?}", prod_str);
    tracing::trace!(
        "                     interface: {}",
        device.interface_number()
    );

    Some(DebugProbeInfo {
        path: device.path().to_string_lossy().into_owned(),
        product_string: prod_str.to_owned(),
        serial_number: device.serial_number().map(|s| s.to_owned()),
        vendor_id: device.vendor_id(),
        product_id: device.product_id(),
    })
}

/// Open the HID device listed as `info`.
pub fn open_device(
    api: &HidApi,
    info: &DebugProbeInfo,
    timeout: Duration,
) -> Result<CmsisDapDevice, DebugProbeError> {
    let path = std::ffi::CString::new(info.path.clone()).map_err(|_| DebugProbeError::NotFound)?;
    let device = api.open_path(&path)?;

    tracing::debug!("Opened {:?} in CMSIS-DAP v1 mode", info);
    Ok(CmsisDapDevice::new(Box::new(device), timeout))
}

#[cfg(test)]
mod test {
    use super::is_cmsis_dap;

    #[test]
    fn product_string_filter() {
        assert!(is_cmsis_dap("DAPLink CMSIS-DAP"));
        assert!(is_cmsis_dap("CMSIS-DAP v1"));
        assert!(!is_cmsis_dap("USB Keyboard"));
    }
}
