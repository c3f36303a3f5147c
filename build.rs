fn main() {
    // CoreBluetooth keeps an unbundled CLI "unauthorised" (scans return
    // nothing) unless the executable carries an Info.plist with
    // NSBluetoothAlwaysUsageDescription.  Link ours into the
    // __TEXT,__info_plist section of every macOS binary.
    //
    // CARGO_CFG_TARGET_OS is the target, so cross builds get it too.
    println!("cargo:rerun-if-changed=Info.plist");
    if std::env::var("CARGO_CFG_TARGET_OS").as_deref() != Ok("macos") {
        return;
    }
    let Ok(dir) = std::env::var("CARGO_MANIFEST_DIR") else {
        println!("cargo:warning=CARGO_MANIFEST_DIR unset; Info.plist not embedded");
        return;
    };
    for arg in [
        "-sectcreate".to_owned(),
        "__TEXT".to_owned(),
        "__info_plist".to_owned(),
        format!("{dir}/Info.plist"),
    ] {
        println!("cargo:rustc-link-arg={arg}");
    }
}
