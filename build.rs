use std::env;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

const KERNELS: &[(&str, &str)] = &[(
    "kernels/cuda/matched_filter_kernel.cu",
    "matched_filter_kernel.ptx",
)];

const DEFAULT_ARCH: &str = "compute_89";
const FALLBACK_ARCH: &str = "compute_80";

fn main() {
    // Cargo exposes active features to build scripts as CARGO_FEATURE_*.
    if env::var("CARGO_FEATURE_CUDA").is_ok() {
        compile_cuda_kernels();
    }
}

fn compile_cuda_kernels() {
    println!("cargo:rerun-if-changed=kernels/cuda");
    for var in [
        "CUDA_ARCH",
        "CUDA_ARCHS",
        "CUDA_KERNEL_DIR",
        "NVCC",
        "NVCC_ARGS",
        "CUDA_DEBUG",
        "CUDA_FAST_MATH",
    ] {
        println!("cargo:rerun-if-env-changed={}", var);
    }

    // PTX is JIT-loaded at runtime, so nothing links against cudart.
    let cuda_path = find_cuda_path();
    for (rel_src, ptx_name) in KERNELS {
        compile_kernel(&cuda_path, rel_src, ptx_name);
    }
}

fn find_cuda_path() -> String {
    env::var("CUDA_PATH")
        .or_else(|_| env::var("CUDA_HOME"))
        .unwrap_or_else(|_| {
            if cfg!(target_os = "windows") {
                newest_windows_toolkit().unwrap_or_else(|| {
                    "C:/Program Files/NVIDIA GPU Computing Toolkit/CUDA/v13.0".to_string()
                })
            } else {
                "/usr/local/cuda".to_string()
            }
        })
}

/// Highest `vMAJOR.MINOR` directory under the default toolkit root.
fn newest_windows_toolkit() -> Option<String> {
    let base = "C:/Program Files/NVIDIA GPU Computing Toolkit/CUDA";
    let entries = std::fs::read_dir(base).ok()?;
    entries
        .flatten()
        .filter_map(|e| e.file_name().into_string().ok())
        .filter_map(|name| {
            let version = name.strip_prefix('v')?;
            let mut parts = version.split('.');
            let major = parts.next()?.parse::<u32>().ok()?;
            let minor = parts
                .next()
                .and_then(|s| s.parse::<u32>().ok())
                .unwrap_or(0);
            Some(((major, minor), format!("{}/{}", base, name)))
        })
        .max_by_key(|(version, _)| *version)
        .map(|(_, path)| {
            eprintln!("Found CUDA at: {}", path);
            path
        })
}

/// Accepts `89`, `8.9`, `sm_89` or `compute_89` and returns the `compute_XX` form.
fn normalize_arch(raw: &str) -> Option<String> {
    let t = raw.trim();
    if t.is_empty() {
        return None;
    }
    if let Some(rest) = t.strip_prefix("sm_") {
        return Some(format!("compute_{}", rest));
    }
    if t.starts_with("compute_") {
        return Some(t.to_string());
    }
    let digits: String = t.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.len() >= 2 {
        return Some(format!("compute_{}", &digits[..2]));
    }
    Some(t.to_string())
}

fn requested_arch() -> String {
    let from_list = env::var("CUDA_ARCHS").ok().and_then(|list| {
        list.split(|c: char| c == ',' || c.is_ascii_whitespace())
            .find_map(normalize_arch)
    });
    from_list
        .or_else(|| env::var("CUDA_ARCH").ok().and_then(|a| normalize_arch(&a)))
        .unwrap_or_else(|| DEFAULT_ARCH.to_string())
}

fn kernel_source(rel_src: &str) -> String {
    match env::var("CUDA_KERNEL_DIR") {
        Ok(root) => match rel_src.strip_prefix("kernels/cuda/") {
            Some(rest) => format!("{}/{}", root.trim_end_matches(['/', '\\']), rest),
            None => rel_src.to_string(),
        },
        Err(_) => rel_src.to_string(),
    }
}

fn nvcc_command(nvcc: &str, arch: &str, ptx_path: &Path, src_path: &str) -> Command {
    let mut cmd = Command::new(nvcc);
    cmd.args(["-std=c++17", "-ptx", "-O3"]);

    // Correlation normalization is sensitive to approximate sqrt/div, so fast
    // math is opt-in here.
    if env::var("CUDA_FAST_MATH").ok().as_deref() == Some("1") {
        cmd.arg("--use_fast_math");
    }
    if env::var("CUDA_DEBUG").ok().as_deref() == Some("1") {
        cmd.arg("-lineinfo");
    }

    cmd.arg("-arch").arg(arch);
    cmd.arg("-o").arg(ptx_path).arg(src_path);

    if let Ok(extra) = env::var("NVCC_ARGS") {
        cmd.args(extra.split_whitespace());
    }

    if cfg!(target_os = "windows") {
        cmd.arg("-D_ALLOW_COMPILER_AND_STL_VERSION_MISMATCH");
        cmd.arg("-allow-unsupported-compiler");
        if let Ok(vs_path) = find_vs_installation() {
            cmd.arg("-ccbin").arg(vs_path);
        }
    }
    cmd
}

fn run_nvcc(mut cmd: Command) -> Output {
    eprintln!("Running nvcc command: {:?}", cmd);
    cmd.output().expect("Failed to execute nvcc")
}

fn is_arch_failure(output: &Output) -> bool {
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    stderr.contains("unsupported gpu architecture")
        || stderr.contains("Value 'compute_")
        || stdout.contains("unsupported gpu architecture")
}

fn compile_kernel(cuda_path: &str, rel_src: &str, ptx_name: &str) {
    let src_path = kernel_source(rel_src);
    println!("cargo:rerun-if-changed={}", src_path);

    let out_dir = PathBuf::from(env::var("OUT_DIR").expect("OUT_DIR"));
    let ptx_path = out_dir.join(ptx_name);

    if cfg!(target_os = "windows") && env::var("VCINSTALLDIR").is_err() {
        eprintln!(
            "Warning: VCINSTALLDIR not set. nvcc may need a Visual Studio Developer Command Prompt."
        );
    }

    let nvcc = env::var("NVCC").unwrap_or_else(|_| {
        if cfg!(target_os = "windows") {
            format!("{}/bin/nvcc.exe", cuda_path)
        } else {
            format!("{}/bin/nvcc", cuda_path)
        }
    });

    let arch = requested_arch();
    let mut output = run_nvcc(nvcc_command(&nvcc, &arch, &ptx_path, &src_path));

    if !output.status.success() && arch != FALLBACK_ARCH && is_arch_failure(&output) {
        eprintln!(
            "Falling back to -arch={} for {} (nvcc doesn't support {})",
            FALLBACK_ARCH, rel_src, arch
        );
        output = run_nvcc(nvcc_command(&nvcc, FALLBACK_ARCH, &ptx_path, &src_path));
    }

    if !output.status.success() {
        eprintln!("CUDA compilation failed for {}!", rel_src);
        eprintln!("stdout: {}", String::from_utf8_lossy(&output.stdout));
        eprintln!("stderr: {}", String::from_utf8_lossy(&output.stderr));
        if cfg!(target_os = "windows")
            && String::from_utf8_lossy(&output.stderr).contains("Cannot find compiler 'cl.exe'")
        {
            eprintln!(
                "nvcc requires the MSVC compiler (cl.exe). Install Visual Studio Build Tools \
                 2022 or build from a Developer Command Prompt."
            );
        }
        panic!("nvcc compilation failed");
    }

    eprintln!("Compiled {} to {}", src_path, ptx_path.display());
}

#[cfg(target_os = "windows")]
fn find_vs_installation() -> Result<String, ()> {
    let roots = [
        "C:/Program Files/Microsoft Visual Studio/2022/Community/VC/Tools/MSVC",
        "C:/Program Files/Microsoft Visual Studio/2022/Professional/VC/Tools/MSVC",
        "C:/Program Files/Microsoft Visual Studio/2022/Enterprise/VC/Tools/MSVC",
        "C:/Program Files (x86)/Microsoft Visual Studio/2022/BuildTools/VC/Tools/MSVC",
        "C:/Program Files/Microsoft Visual Studio/2019/Community/VC/Tools/MSVC",
    ];

    for root in &roots {
        let newest = std::fs::read_dir(root).ok().and_then(|entries| {
            entries
                .filter_map(|e| e.ok())
                .filter_map(|e| e.file_name().into_string().ok())
                .filter(|name| name.starts_with("14."))
                .max()
        });
        if let Some(msvc) = newest {
            let cl_dir = format!("{}/{}/bin/Hostx64/x64", root, msvc);
            if Path::new(&format!("{}/cl.exe", cl_dir)).exists() {
                eprintln!("Found cl.exe at: {}", cl_dir);
                return Ok(cl_dir);
            }
        }
    }
    Err(())
}

#[cfg(not(target_os = "windows"))]
fn find_vs_installation() -> Result<String, ()> {
    Err(())
}
