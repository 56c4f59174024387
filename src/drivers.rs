//! Driver-executable allow-lists used to classify devices.
//!
//! A device announces itself through a `DRIVER_INFO` text vector whose
//! `DRIVER_EXEC` element names the driver executable. The table maps that
//! executable to zero or more device categories. The table is plain data
//! passed into the handler at construction; callers can extend it for
//! drivers the built-in lists do not know.

use crate::events::DeviceInterface;
use std::collections::HashSet;

/// Per-category sets of known driver executables.
#[derive(Debug, Clone)]
pub struct DriverTable {
    pub mounts: HashSet<String>,
    pub cameras: HashSet<String>,
    pub filter_wheels: HashSet<String>,
    pub focusers: HashSet<String>,
    pub gps: HashSet<String>,
}

const MOUNT_DRIVERS: &[&str] = &[
    "indi_astrotrac_telescope",
    "indi_azgti_telescope",
    "indi_bresserexos2",
    "indi_celestron_aux",
    "indi_celestron_gps",
    "indi_crux_mount",
    "indi_dsc_telescope",
    "indi_eq500x_telescope",
    "indi_eqmod_telescope",
    "indi_ieq_telescope",
    "indi_ieqlegacy_telescope",
    "indi_ioptronHC8406",
    "indi_ioptronv3_telescope",
    "indi_lx200_10micron",
    "indi_lx200_16",
    "indi_lx200_OnStep",
    "indi_lx200_OpenAstroTech",
    "indi_lx200_TeenAstro",
    "indi_lx200am5",
    "indi_lx200aok",
    "indi_lx200ap_gtocp2",
    "indi_lx200ap_v2",
    "indi_lx200ap",
    "indi_lx200autostar",
    "indi_lx200basic",
    "indi_lx200classic",
    "indi_lx200fs2",
    "indi_lx200gemini",
    "indi_lx200gotonova",
    "indi_lx200gps",
    "indi_lx200pulsar2",
    "indi_lx200ss2000pc",
    "indi_lx200stargo",
    "indi_lx200zeq25",
    "indi_paramount_telescope",
    "indi_pmc8_telescope",
    "indi_rainbow_telescope",
    "indi_script_telescope",
    "indi_simulator_telescope",
    "indi_skycommander_telescope",
    "indi_skywatcherAltAzMount",
    "indi_staradventurer2i_telescope",
    "indi_starbook_telescope",
    "indi_starbook_ten",
    "indi_synscan_telescope",
    "indi_synscanlegacy_telescope",
    "indi_temma_telescope",
];

const CAMERA_DRIVERS: &[&str] = &[
    "indi_altair_ccd",
    "indi_apogee_ccd",
    "indi_asi_ccd",
    "indi_asi_single_ccd",
    "indi_atik_ccd",
    "indi_cam90_ccd",
    "indi_canon_ccd",
    "indi_dsi_ccd",
    "indi_ffmv_ccd",
    "indi_fishcamp_ccd",
    "indi_fli_ccd",
    "indi_fuji_ccd",
    "indi_gphoto_ccd",
    "indi_inovaplx_ccd",
    "indi_kepler_ccd",
    "indi_mallincam_ccd",
    "indi_mi_ccd_eth",
    "indi_mi_ccd_usb",
    "indi_nightscape_ccd",
    "indi_nikon_ccd",
    "indi_nncam_ccd",
    "indi_omegonprocam_ccd",
    "indi_orion_ssg3_ccd",
    "indi_pentax_ccd",
    "indi_pentax",
    "indi_playerone_ccd",
    "indi_qhy_ccd",
    "indi_qsi_ccd",
    "indi_rpicam",
    "indi_sbig_ccd",
    "indi_simulator_ccd",
    "indi_simulator_guide",
    "indi_sony_ccd",
    "indi_starshootg_ccd",
    "indi_svbony_ccd",
    "indi_sx_ccd",
    "indi_toupcam_ccd",
    "indi_v4l2_ccd",
    "indi_webcam_ccd",
];

const FILTER_WHEEL_DRIVERS: &[&str] = &[
    "indi_asi_wheel",
    "indi_fli_wheel",
    "indi_manual_wheel",
    "indi_optec_wheel",
    "indi_playerone_wheel",
    "indi_qhycfw1_wheel",
    "indi_qhycfw2_wheel",
    "indi_qhycfw3_wheel",
    "indi_quantum_wheel",
    "indi_simulator_wheel",
    "indi_sx_wheel",
    "indi_trutech_wheel",
    "indi_xagyl_wheel",
];

const FOCUSER_DRIVERS: &[&str] = &[
    "indi_aaf2_focus",
    "indi_activefocuser_focus",
    "indi_asi_focuser",
    "indi_celestron_sct_focus",
    "indi_deepskydad_af1_focus",
    "indi_deepskydad_af2_focus",
    "indi_deepskydad_af3_focus",
    "indi_dmfc_focus",
    "indi_dreamfocuser_focus",
    "indi_efa_focus",
    "indi_esatto_focus",
    "indi_esattoarco_focus",
    "indi_fcusb_focus",
    "indi_fli_focus",
    "indi_focuslynx_focus",
    "indi_gemini_focus",
    "indi_hitecastrodc_focus",
    "indi_lacerta_mfoc_focus",
    "indi_lakeside_focus",
    "indi_microtouch_focus",
    "indi_moonlite_focus",
    "indi_moonlitedro_focus",
    "indi_myfocuserpro2_focus",
    "indi_nfocus",
    "indi_nightcrawler_focus",
    "indi_nstep_focus",
    "indi_oasis_focuser",
    "indi_onfocus_focus",
    "indi_pegasus_focuscube",
    "indi_perfectstar_focus",
    "indi_rainbowrsf_focus",
    "indi_rbfocus_focus",
    "indi_robo_focus",
    "indi_sestosenso2_focus",
    "indi_sestosenso_focus",
    "indi_siefs_focus",
    "indi_simulator_focus",
    "indi_smartfocus_focus",
    "indi_steeldrive2_focus",
    "indi_steeldrive_focus",
    "indi_tcfs3_focus",
    "indi_tcfs_focus",
    "indi_usbfocusv3_focus",
];

const GPS_DRIVERS: &[&str] = &["indi_gpsd", "indi_gpsnmea", "indi_simulator_gps"];

fn set_of(drivers: &[&str]) -> HashSet<String> {
    drivers.iter().map(|d| d.to_string()).collect()
}

impl Default for DriverTable {
    fn default() -> Self {
        Self {
            mounts: set_of(MOUNT_DRIVERS),
            cameras: set_of(CAMERA_DRIVERS),
            filter_wheels: set_of(FILTER_WHEEL_DRIVERS),
            focusers: set_of(FOCUSER_DRIVERS),
            gps: set_of(GPS_DRIVERS),
        }
    }
}

impl DriverTable {
    /// An empty table. Useful for tests and callers that register their
    /// own driver lists.
    pub fn empty() -> Self {
        Self {
            mounts: HashSet::new(),
            cameras: HashSet::new(),
            filter_wheels: HashSet::new(),
            focusers: HashSet::new(),
            gps: HashSet::new(),
        }
    }

    /// Every category the executable belongs to. A driver that serves
    /// several device kinds (a mount with a built-in GPS, say) appears in
    /// more than one list.
    pub fn interfaces(&self, executable: &str) -> Vec<DeviceInterface> {
        let mut interfaces = Vec::new();
        if self.mounts.contains(executable) {
            interfaces.push(DeviceInterface::Mount);
        }
        if self.cameras.contains(executable) {
            interfaces.push(DeviceInterface::Camera);
        }
        if self.filter_wheels.contains(executable) {
            interfaces.push(DeviceInterface::FilterWheel);
        }
        if self.focusers.contains(executable) {
            interfaces.push(DeviceInterface::Focuser);
        }
        if self.gps.contains(executable) {
            interfaces.push(DeviceInterface::Gps);
        }
        interfaces
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simulator_drivers_classify() {
        let table = DriverTable::default();
        assert_eq!(
            table.interfaces("indi_simulator_telescope"),
            vec![DeviceInterface::Mount]
        );
        assert_eq!(table.interfaces("indi_simulator_ccd"), vec![DeviceInterface::Camera]);
        assert_eq!(
            table.interfaces("indi_simulator_wheel"),
            vec![DeviceInterface::FilterWheel]
        );
        assert_eq!(table.interfaces("indi_simulator_focus"), vec![DeviceInterface::Focuser]);
        assert_eq!(table.interfaces("indi_simulator_gps"), vec![DeviceInterface::Gps]);
    }

    #[test]
    fn test_unknown_driver_has_no_interfaces() {
        let table = DriverTable::default();
        assert!(table.interfaces("indi_unheard_of").is_empty());
    }

    #[test]
    fn test_custom_table_extension() {
        let mut table = DriverTable::empty();
        table.mounts.insert("my_custom_mount".to_string());
        assert_eq!(table.interfaces("my_custom_mount"), vec![DeviceInterface::Mount]);
    }
}
