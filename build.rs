fn main() {
    // ── macOS: embed Info.plist so CoreBluetooth grants Bluetooth access ──────
    //
    // CBCentralManager stays "unauthorised" and never reports IPAD_SYNC
    // unless the binary carries NSBluetoothAlwaysUsageDescription.  A CLI
    // tool has no bundle, so the plist goes into the __TEXT,__info_plist
    // section of the Mach-O binary instead.
    //
    // `CARGO_CFG_TARGET_OS` is the target, not the host.
    if std::env::var("CARGO_CFG_TARGET_OS").as_deref() == Ok("macos") {
        let Ok(dir) = std::env::var("CARGO_MANIFEST_DIR") else {
            panic!("CARGO_MANIFEST_DIR is not set; build.rs must run under Cargo");
        };
        let plist = format!("{dir}/Info.plist");

        // ld … -sectcreate __TEXT __info_plist <plist> …
        for arg in ["-sectcreate", "__TEXT", "__info_plist", plist.as_str()] {
            println!("cargo:rustc-link-arg={arg}");
        }
        println!("cargo:rerun-if-changed=Info.plist");
    }
}
