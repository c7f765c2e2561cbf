use crate::entity::blockdev::{LogicalVolume, VolumeGroup};
use crate::errors::SupError;
use crate::utils::retry::{self, Policy};
use crate::utils::shell::Executor;

/// Executes, retrying while the device is not yet visible:
/// ```shell
/// pvcreate ${{ pv }}
/// ```
pub fn create_pv(exec: &dyn Executor, pv: &str, policy: Policy) -> Result<(), SupError> {
    retry::retry_device(pv, policy, || exec.exec(&["pvcreate", pv]).map(|_| ()))
}

/// Executes:
/// ```shell
/// vgcreate ${{ vg.name }} ${{ vg.physvol }}
/// ```
pub fn create_vg(exec: &dyn Executor, vg: &VolumeGroup) -> Result<(), SupError> {
    exec.exec(&["vgcreate", &vg.name, &vg.physvol]).map(|_| ())
}

/// Executes:
/// ```shell
/// lvcreate -L ${{ lv.size }} -n ${{ lv.name }} ${{ vg.name }}
///
/// # or, if lv.size is relative, e.g. 100%FREE:
///
/// lvcreate -l ${{ lv.size }} -n ${{ lv.name }} ${{ vg.name }}
/// ```
pub fn create_lv(exec: &dyn Executor, vg: &VolumeGroup, lv: &LogicalVolume) -> Result<(), SupError> {
    exec.exec(&["lvcreate", lv.size_flag(), &lv.size, "-n", &lv.name, &vg.name])
        .map(|_| ())
}
