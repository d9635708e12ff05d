// build.rs
// Compiles GLSL sources under resources/shaders into SPIR-V under target/shaders

use std::env;
use std::path::{Path, PathBuf};
use std::process::Command;

const STAGES: [&str; 6] = ["vert", "frag", "comp", "geom", "tesc", "tese"];

/// Recursively compile all shader files in a directory
fn compile_shaders_recursive(
    shader_dir: &Path,
    include_dir: &Path,
    target_dir: &Path,
    glslc: &str,
    compiled_count: &mut i32,
) {
    let shader_files = match std::fs::read_dir(shader_dir) {
        Ok(files) => files,
        Err(_) => {
            eprintln!("info: No shader directory found at: {:?}", shader_dir);
            return;
        }
    };

    for entry in shader_files {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                eprintln!("warning: Error reading shader directory entry: {}", e);
                continue;
            }
        };

        let path = entry.path();

        if path.is_dir() {
            compile_shaders_recursive(&path, include_dir, target_dir, glslc, compiled_count);
            continue;
        }

        let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
            continue;
        };
        if !STAGES.contains(&ext) {
            continue;
        }
        let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };

        // default.vert -> default.vert.spv, so both stages of one program can coexist
        let out_file = target_dir.join(format!("{}.spv", file_name));

        let needs_compile = match (std::fs::metadata(&path), std::fs::metadata(&out_file)) {
            (Ok(src), Ok(dst)) => match (src.modified(), dst.modified()) {
                (Ok(src_time), Ok(dst_time)) => src_time > dst_time,
                _ => true,
            },
            _ => true,
        };

        if !needs_compile {
            eprintln!("info: Shader {} is up to date", file_name);
            continue;
        }

        let status = Command::new(glslc)
            .arg("-I")
            .arg(include_dir)
            .arg(&path)
            .arg("-o")
            .arg(&out_file)
            .status();

        match status {
            Ok(s) if s.success() => {
                eprintln!("info: Compiled {} -> {:?}", file_name, out_file);
                *compiled_count += 1;
            }
            Ok(s) => {
                eprintln!("error: glslc failed for {:?} with exit code: {}", path, s.code().unwrap_or(-1));
                panic!("Shader compilation failed");
            }
            Err(e) => {
                eprintln!("error: Failed to run glslc for {:?}: {}", path, e);
                panic!("Failed to execute shader compiler");
            }
        }
    }
}

fn main() {
    let manifest_dir = PathBuf::from(env::var("CARGO_MANIFEST_DIR").unwrap_or_else(|_| ".".into()));
    let workspace_root = manifest_dir.join("..").join("..");
    let shader_dir = workspace_root.join("resources").join("shaders");
    let target_dir = workspace_root.join("target").join("shaders");

    println!("cargo:rerun-if-changed={}", shader_dir.display());
    println!("cargo:rerun-if-env-changed=SKIP_SHADERS");
    println!("cargo:rerun-if-env-changed=VULKAN_SDK");

    if env::var("SKIP_SHADERS").is_ok() {
        eprintln!("info: Skipping shader compilation (SKIP_SHADERS set)");
        return;
    }

    let vulkan_sdk = match env::var("VULKAN_SDK") {
        Ok(sdk) => sdk,
        Err(_) => {
            eprintln!("warning: VULKAN_SDK not set, shader compilation skipped");
            eprintln!("hint: Install Vulkan SDK and set VULKAN_SDK environment variable");
            return;
        }
    };

    let glslc = if cfg!(target_os = "windows") {
        format!("{}\\Bin\\glslc.exe", vulkan_sdk)
    } else {
        format!("{}/bin/glslc", vulkan_sdk)
    };

    if !Path::new(&glslc).exists() {
        eprintln!("error: glslc not found at: {}", glslc);
        eprintln!("hint: Ensure Vulkan SDK is properly installed");
        panic!("Shader compiler not found");
    }

    if let Err(e) = std::fs::create_dir_all(&target_dir) {
        eprintln!("warning: Failed to create target directory: {}", e);
        return;
    }

    let mut compiled_count = 0;
    compile_shaders_recursive(&shader_dir, &shader_dir, &target_dir, &glslc, &mut compiled_count);

    if compiled_count > 0 {
        eprintln!("info: Successfully compiled {} shader(s)", compiled_count);
    } else {
        eprintln!("info: All shaders are up to date");
    }
}
