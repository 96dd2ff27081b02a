//! The attached probes and everything found behind one of them.

use hidapi::HidApi;

use crate::{
    architecture::arm::{
        dp::Ctrl,
        memory::romtable::{AccessPortDescription, Topology},
        ArmCommunicationInterface, ArmCommunicationInterfaceState,
    },
    config::{Config, ProbeFilter},
    error::Error,
    probe::{
        cmsisdap::{
            commands::{swj::pins::PinStatus, CmsisDapDevice},
            tools, DapInfo,
        },
        CmsisDap, ConnectionType, DebugProbeError, DebugProbeInfo, JtagDevice,
    },
    target_interface::{AdiTargetInterface, DebugUnits},
};

/// The target interface of an opened and scanned [`Device`].
pub type DeviceTargetInterface<'device> =
    AdiTargetInterface<'device, ArmCommunicationInterface<'device>>;

/// All CMSIS-DAP probes attached to this host that pass the configured filter.
pub struct AltLink {
    api: HidApi,
    config: Config,
    devices: Vec<Device>,
}

impl std::fmt::Debug for AltLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AltLink")
            .field("devices", &self.devices)
            .finish()
    }
}

impl AltLink {
    pub fn new(config: Config) -> Result<Self, Error> {
        let api = HidApi::new().map_err(DebugProbeError::from)?;
        Ok(Self {
            api,
            config,
            devices: Vec::new(),
        })
    }

    /// Rescan the USB bus. Devices from an earlier enumeration are dropped.
    #[tracing::instrument(skip(self))]
    pub fn enumerate(&mut self) -> Result<&mut [Device], Error> {
        self.devices.clear();
        self.api
            .refresh_devices()
            .map_err(DebugProbeError::from)?;

        let probes = select_probes(tools::list_cmsisdap_devices(&self.api), &self.config.probe);
        tracing::info!("{} CMSIS-DAP devices selected", probes.len());
        self.devices = probes
            .into_iter()
            .map(|info| Device::new(info, self.config.clone()))
            .collect();
        Ok(&mut self.devices)
    }

    pub fn devices(&self) -> &[Device] {
        &self.devices
    }

    /// Open and initialize the `index`th enumerated device.
    pub fn open(&mut self, index: usize) -> Result<&mut Device, Error> {
        let device = self.devices.get_mut(index).ok_or(Error::NoDevice)?;
        device.open(&self.api)?;
        Ok(device)
    }
}

/// Keep the probes passing `filter`.
pub fn select_probes(probes: Vec<DebugProbeInfo>, filter: &ProbeFilter) -> Vec<DebugProbeInfo> {
    probes
        .into_iter()
        .filter(|info| {
            filter.matches(
                info.vendor_id,
                info.product_id,
                info.serial_number.as_deref(),
            )
        })
        .collect()
}

/// One probe and the target behind it.
///
/// The life cycle is `open`, optionally `set_connection_type`, then `scan`. Changing the
/// connection type forgets everything found by the last scan.
#[derive(Debug)]
pub struct Device {
    info: DebugProbeInfo,
    config: Config,
    probe: Option<CmsisDap>,
    state: ArmCommunicationInterfaceState,
    topology: Option<Topology>,
    units: DebugUnits,
}

impl Device {
    pub fn new(info: DebugProbeInfo, config: Config) -> Self {
        let state = ArmCommunicationInterfaceState::new(config.timeouts.power_up());
        Self {
            info,
            config,
            probe: None,
            state,
            topology: None,
            units: DebugUnits::default(),
        }
    }

    pub fn info(&self) -> &DebugProbeInfo {
        &self.info
    }

    pub fn is_opened(&self) -> bool {
        self.probe.is_some()
    }

    pub fn is_scanned(&self) -> bool {
        self.topology.is_some()
    }

    fn probe(&mut self) -> Result<&mut CmsisDap, Error> {
        self.probe.as_mut().ok_or(Error::NotOpened)
    }

    fn forget_target(&mut self) {
        self.state.invalidate();
        self.topology = None;
        self.units = DebugUnits::default();
    }

    /// Open the USB device and initialize the probe.
    pub fn open(&mut self, api: &HidApi) -> Result<(), Error> {
        let device = tools::open_device(api, &self.info, self.config.timeouts.usb())?;
        self.open_with(device)
    }

    /// Initialize the probe on an already opened transport.
    ///
    /// The target's debug port is left in SWD mode with its sticky errors cleared.
    #[tracing::instrument(skip(self, device))]
    pub fn open_with(&mut self, device: CmsisDapDevice) -> Result<(), Error> {
        self.probe = None;
        self.forget_target();

        let mut probe = CmsisDap::new(device, &self.config);
        probe.initialize()?;

        let mut interface = ArmCommunicationInterface::new(&mut probe, &mut self.state);
        match interface.read_idcode() {
            Ok(idcode) => tracing::info!("{}", idcode),
            Err(error) => {
                tracing::error!(
                    "Could not read DP IDCODE, please check the electrical connection: {}",
                    error
                );
                return Err(error.into());
            }
        }

        probe.reset_link()?;
        let ctrl: Ctrl =
            ArmCommunicationInterface::new(&mut probe, &mut self.state).read_dp_register()?;
        tracing::debug!("{}", ctrl);

        self.probe = Some(probe);
        Ok(())
    }

    /// Disconnect from the target and release the probe.
    pub fn close(&mut self) -> Result<(), Error> {
        self.forget_target();
        if let Some(mut probe) = self.probe.take() {
            probe.finalize()?;
        }
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    pub fn set_connection_type(&mut self, connection_type: ConnectionType) -> Result<(), Error> {
        self.probe()?.set_connection_type(connection_type)?;
        self.forget_target();
        Ok(())
    }

    pub fn connection_type(&self) -> Option<ConnectionType> {
        self.probe.as_ref().map(|probe| probe.connection_type())
    }

    /// Set the SWJ clock, returning the clock actually used.
    pub fn set_speed(&mut self, clock_hz: u32) -> Result<u32, Error> {
        Ok(self.probe()?.set_speed(clock_hz)?)
    }

    pub fn dap_info(&self) -> Result<&DapInfo, Error> {
        self.probe
            .as_ref()
            .map(|probe| probe.info())
            .ok_or(Error::NotOpened)
    }

    pub fn pin_status(&mut self) -> Result<PinStatus, Error> {
        Ok(self.probe()?.pin_status()?)
    }

    /// TAPs found by the last scan over JTAG.
    pub fn jtag_devices(&self) -> &[JtagDevice] {
        self.probe
            .as_ref()
            .map(|probe| probe.jtag_devices())
            .unwrap_or_default()
    }

    /// Power up the debug domain and discover the access ports and their components.
    ///
    /// Does nothing if the target has been scanned since the last connection change.
    #[tracing::instrument(skip(self))]
    pub fn scan(&mut self) -> Result<(), Error> {
        if self.is_scanned() {
            return Ok(());
        }

        self.discover()?;

        if self.config.flags.auto_enable_dwt {
            match self.is_dwt_enabled() {
                Ok(true) => {}
                Ok(false) => {
                    tracing::info!("Enabling the DWT");
                    if let Err(error) = self.enable_dwt() {
                        tracing::warn!("Failed to enable the DWT: {}", error);
                    }
                }
                Err(error) => tracing::debug!("DWT state unknown: {}", error),
            }
        }
        Ok(())
    }

    fn discover(&mut self) -> Result<(), Error> {
        self.forget_target();
        let probe = self.probe.as_mut().ok_or(Error::NotOpened)?;

        let jtag = probe.connection_type().is_jtag();
        if jtag {
            let devices = probe.scan_jtag_devices()?.len();
            tracing::info!("{} TAPs on the scan chain", devices);
        }

        let mut interface = ArmCommunicationInterface::new(probe, &mut self.state);
        if !jtag {
            // A freshly switched SW-DP stays in reset state until IDCODE is read.
            let idcode = interface.read_idcode()?;
            tracing::debug!("{}", idcode);
        }

        if self.config.flags.auto_power_up_debug {
            interface.power_up_debug()?;
        }

        let access_ports = interface.scan_access_ports()?;
        let topology = Topology::discover(&mut interface, access_ports);
        tracing::info!(
            "{} access ports, {} of them memory access ports",
            topology.access_ports.len(),
            topology.memory_ap_count()
        );
        self.units = DebugUnits::from_topology(
            &mut interface,
            &topology,
            self.config.timeouts.operation(),
        );
        self.topology = Some(topology);
        Ok(())
    }

    /// The target interface of the scanned target.
    pub fn ti(&mut self) -> Result<DeviceTargetInterface<'_>, Error> {
        if self.topology.is_none() {
            return Err(Error::NotScanned);
        }
        let probe = self.probe.as_mut().ok_or(Error::NotOpened)?;
        let interface = ArmCommunicationInterface::new(probe, &mut self.state);
        Ok(AdiTargetInterface::new(interface, &mut self.units))
    }

    pub fn is_dwt_enabled(&mut self) -> Result<bool, Error> {
        self.ti()?.is_dwt_enabled()
    }

    /// Enable the DWT and, if that changed anything, scan again so its registers are seen.
    pub fn enable_dwt(&mut self) -> Result<(), Error> {
        if self.ti()?.enable_dwt()? {
            self.discover()?;
        }
        Ok(())
    }

    /// Every access port with its ROM table tree, for display.
    pub fn ap_table(&self) -> Result<Vec<AccessPortDescription>, Error> {
        self.topology
            .as_ref()
            .map(|topology| topology.description())
            .ok_or(Error::NotScanned)
    }

    /// Number of access ports giving access to memory.
    pub fn memory_ap_count(&self) -> Result<usize, Error> {
        self.topology
            .as_ref()
            .map(|topology| topology.memory_ap_count())
            .ok_or(Error::NotScanned)
    }
}
