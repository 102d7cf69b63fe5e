use std::env;
use std::fs;
use std::path::PathBuf;

fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    // Only the FT232H backend links against libMPSSE; sim-only builds need no DLLs
    if env::var_os("CARGO_FEATURE_FTDI").is_none() {
        return;
    }

    // Project root for this crate
    let manifest_dir = env::var("CARGO_MANIFEST_DIR").unwrap();
    let project_root = PathBuf::from(&manifest_dir);

    // Shared FTDI libraries are expected in the parent directory
    let shared_root = project_root.parent().unwrap_or(&project_root);

    // MPSSE DLL (Win32/32-bit) and the D2XX driver it depends on
    let mpsse_lib_path = shared_root.join("FTDI MPSSE").join("build").join("Win32").join("DLL");
    let d2xx_lib_path = shared_root.join("FTDI-D2XX-Drivers-Win-2.12.36.20U").join("x86");

    println!("cargo:rustc-link-search=native={}", mpsse_lib_path.display());
    println!("cargo:rustc-link-search=native={}", d2xx_lib_path.display());

    // libmpsse.dll loads FTD2XX.dll at runtime, so only libmpsse is linked
    println!("cargo:rustc-link-lib=dylib=libmpsse");

    // Relink when the DLLs are replaced
    println!("cargo:rerun-if-changed=../FTDI MPSSE/build/Win32/DLL/libmpsse.dll");
    println!("cargo:rerun-if-changed=../FTDI-D2XX-Drivers-Win-2.12.36.20U/x86/FTD2XX.dll");

    // Put both runtime DLLs next to the logger executable so it starts
    // without PATH changes
    if let Ok(profile) = env::var("PROFILE") {
        let target_dir = project_root
            .join("target")
            .join("i686-pc-windows-msvc")
            .join(&profile);

        // Absent during a bare script check; nothing to copy into yet
        if target_dir.exists() {
            // Missing source DLLs surface later as a link or load error
            let _ = fs::copy(mpsse_lib_path.join("libmpsse.dll"), target_dir.join("libmpsse.dll"));
            let _ = fs::copy(d2xx_lib_path.join("FTD2XX.dll"), target_dir.join("FTD2XX.dll"));

            println!("cargo:warning=Copied runtime DLLs to {}", target_dir.display());
        }
    }
}
