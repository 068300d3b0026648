//! Reconciliation tests: rebuilding reference counts from the mount table
//! after a restart, and the deferred-unmount window before the first
//! successful pass.

mod common;

use std::time::Duration;

use common::Harness;
use dockvol_shared::plugin::{MountRequest, UnmountRequest, VolumeRequest};

#[tokio::test(start_paused = true)]
async fn test_reconcile_adopts_mounted_volumes() {
    let h = Harness::new();
    assert!(!h.driver.init_success());

    // A previous daemon instance left these mounted.
    h.mounter.seed_mount(
        &h.driver.layout().volume_mountpoint("vol1@store1"),
        "ext4",
        "/dev/sdb",
    );
    h.mounter.seed_mount(
        &h.driver.layout().volume_mountpoint("vol2@store1"),
        "xfs",
        "/dev/sdc",
    );
    // Unrelated host mount, outside the mount root.
    h.mounter
        .seed_mount(std::path::Path::new("/boot"), "vfat", "/dev/sda1");

    h.driver.reconcile().await.unwrap();

    assert!(h.driver.init_success());
    assert_eq!(h.driver.get_count("vol1@store1").await, 1);
    assert_eq!(h.driver.get_count("vol2@store1").await, 1);
    assert_eq!(h.driver.get_count("boot").await, 0);
}

#[tokio::test(start_paused = true)]
async fn test_reconcile_skips_network_root_mounts() {
    let h = Harness::new();

    // A label's backing export is shared infrastructure, not a volume.
    h.mounter.seed_mount(
        &h.driver.layout().label_mountpoint("nfs1"),
        "nfs",
        "filer:/export",
    );

    h.driver.reconcile().await.unwrap();
    assert!(h.driver.init_success());
    assert_eq!(h.driver.get_count("nfs1").await, 0);
    assert_eq!(h.driver.get_count("remote").await, 0);
}

#[tokio::test(start_paused = true)]
async fn test_deferred_unmount_then_reconcile_then_release() {
    let h = Harness::new();

    // Volume mounted by a previous instance, still known remotely.
    h.control
        .insert_volume("vol1", common::status_with_location("store1"));
    h.mounter.seed_mount(
        &h.driver.layout().volume_mountpoint("vol1@store1"),
        "ext4",
        "/dev/sdb",
    );

    // Before reconciliation: the unmount is deferred, nothing physical.
    h.driver
        .unmount(&UnmountRequest {
            name: "vol1".to_string(),
            mount_id: "old-container".to_string(),
        })
        .await
        .unwrap();
    assert_eq!(h.mounter.counters().unmount, 0);
    assert_eq!(h.control.counters().detach, 0);

    // Reconciliation adopts the still-mounted volume at count 1.
    h.driver.reconcile().await.unwrap();
    assert_eq!(h.driver.get_count("vol1@store1").await, 1);

    // Now the release is trusted and does the physical work.
    h.driver
        .unmount(&UnmountRequest {
            name: "vol1".to_string(),
            mount_id: "old-container".to_string(),
        })
        .await
        .unwrap();
    assert_eq!(h.mounter.counters().unmount, 1);
    assert_eq!(h.control.counters().detach, 1);
    assert_eq!(h.driver.get_count("vol1@store1").await, 0);
}

#[tokio::test(start_paused = true)]
async fn test_reconcile_preserves_live_counts() {
    let h = Harness::new().ready().await;
    h.driver.create(&VolumeRequest::new("vol1")).await.unwrap();

    for id in ["m1", "m2"] {
        h.driver
            .mount(&MountRequest {
                name: "vol1".to_string(),
                mount_id: id.to_string(),
            })
            .await
            .unwrap();
    }
    assert_eq!(h.driver.get_count("vol1@store1").await, 2);

    // A periodic pass must not reset live counts to 1.
    h.driver.reconcile().await.unwrap();
    assert_eq!(h.driver.get_count("vol1@store1").await, 2);
}

#[tokio::test(start_paused = true)]
async fn test_reconcile_with_retry_survives_transient_failures() {
    let h = Harness::new();
    h.mounter.seed_mount(
        &h.driver.layout().volume_mountpoint("vol1@store1"),
        "ext4",
        "/dev/sdb",
    );
    h.mounter.fail_list_mounts(2);

    h.driver
        .reconcile_with_retry(5, Duration::from_millis(200))
        .await
        .unwrap();

    assert!(h.driver.init_success());
    assert_eq!(h.driver.get_count("vol1@store1").await, 1);
}

#[tokio::test(start_paused = true)]
async fn test_reconcile_with_retry_gives_up() {
    let h = Harness::new();
    h.mounter.fail_list_mounts(10);

    let result = h
        .driver
        .reconcile_with_retry(3, Duration::from_millis(100))
        .await;
    assert!(result.is_err());
    assert!(!h.driver.init_success());
}
