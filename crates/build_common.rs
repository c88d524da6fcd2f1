// Shared build script helper: turns a crate README into its rustdoc front page.
// Include this in build.rs files with: include!("../build_common.rs");
//
// Required imports in the including file:
//   use std::env;
//   use std::fs;
//   use std::path::Path;

/// Copy a crate's README.md into `OUT_DIR/README_GENERATED.md` for
/// `#![doc = include_str!(...)]`.
///
/// Links of the form `](src/foo.rs)` are rewritten to `](foo)` so rustdoc
/// resolves them to modules. A missing README yields an empty page rather
/// than a build failure.
fn process_readme_for_rustdoc(crate_dir: &str) {
    println!("cargo:rerun-if-changed=README.md");

    let readme_path = Path::new(crate_dir).join("README.md");
    let rustdoc_content = fs::read_to_string(&readme_path)
        .map(|content| content.replace("](src/", "](").replace(".rs)", ")"))
        .unwrap_or_default();

    let Ok(out_dir) = env::var("OUT_DIR") else {
        return;
    };
    let dest_path = Path::new(&out_dir).join("README_GENERATED.md");
    if let Err(e) = fs::write(dest_path, rustdoc_content) {
        println!("cargo:warning=failed to write README_GENERATED.md: {e}");
    }
}
