//! Embedded toolchain scripts and deployment utilities.
//!
//! The exporter and toolkit driver are Python programs stored as string
//! constants and written to disk on first use or when the embedded version
//! changes (detected via hash comparison). They run inside a managed venv
//! so the host Python environment is never touched.

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::config::{PathsConfig, ToolkitConfig};
use crate::error::{ForgeError, Result};

/// Python requirements for the toolchain virtual environment.
pub const REQUIREMENTS: &str = "\
rknn-toolkit2>=2.0.0
torch>=2.0.0
ultralytics>=8.1.0
numpy>=1.24.0
";

/// Python script that traces a native checkpoint into a TorchScript graph.
pub const EXPORT_GRAPH_SCRIPT: &str = r#"#!/usr/bin/env python3
"""Trace a training checkpoint into a TorchScript graph.

Loads the checkpoint (ultralytics first, bare torch as fallback), freezes
dynamic heads, traces at a fixed input size, and writes the graph next to
the requested output path. Reports progress as JSON lines on stdout.
"""
import argparse
import json
import os
import sys


def progress(stage, **kwargs):
    """Emit a JSON progress line to stdout."""
    print(json.dumps({"stage": stage, **kwargs}), flush=True)


def load_model(path):
    try:
        from ultralytics import YOLO
        model = YOLO(path)
        return model.model, None
    except Exception as first:
        try:
            import torch
            checkpoint = torch.load(path, map_location="cpu")
            if isinstance(checkpoint, dict) and "model" in checkpoint:
                model = checkpoint["model"]
                if hasattr(model, "float"):
                    model = model.float()
            else:
                model = checkpoint
            return model, None
        except Exception as second:
            return None, f"ultralytics: {first}; torch: {second}"


def main():
    parser = argparse.ArgumentParser(description="Export a checkpoint to TorchScript")
    parser.add_argument("--checkpoint", required=True)
    parser.add_argument("--output", required=True)
    parser.add_argument("--height", type=int, required=True)
    parser.add_argument("--width", type=int, required=True)
    args = parser.parse_args()

    try:
        import torch
    except ImportError as e:
        progress("error", message=f"Missing required package: {e}")
        sys.exit(1)

    progress("loading", message=f"Loading checkpoint {args.checkpoint}")
    model, err = load_model(args.checkpoint)
    if model is None:
        progress("error", message=err)
        sys.exit(1)

    model.eval()
    # Freeze dynamic heads so the trace stays static-shape for the compiler.
    for module in model.modules():
        if hasattr(module, "export"):
            module.export = True
            if not hasattr(module, "format"):
                module.format = "torchscript"
        if hasattr(module, "dynamic"):
            module.dynamic = False
        if hasattr(module, "inplace"):
            module.inplace = False

    progress("tracing", message=f"Tracing at 1x3x{args.height}x{args.width}")
    dummy = torch.randn(1, 3, args.height, args.width)
    with torch.no_grad():
        # Warm-up forward pass initializes any lazily-built layers.
        model(dummy)
        traced = torch.jit.trace(model, dummy, strict=False, check_trace=False)

    progress("writing", message=f"Saving graph to {args.output}")
    torch.jit.save(traced, args.output)

    if not os.path.exists(args.output):
        progress("error", message="trace completed but no output file was written")
        sys.exit(1)
    progress("complete", output_path=args.output,
             output_size=os.path.getsize(args.output))


if __name__ == "__main__":
    main()
"#;

/// Python driver exposing the NPU toolkit's staged compile API.
///
/// Reads one JSON command per stdin line and answers each with one JSON
/// response line, so the Rust side sees configure / load / build / export
/// succeed or fail individually.
pub const TOOLKIT_DRIVER_SCRIPT: &str = r#"#!/usr/bin/env python3
"""Staged NPU toolkit driver.

Protocol: one JSON object per stdin line, one JSON response per stdout line.
Commands: configure, load, build, export, release. The driver exits after
release; the toolkit handle is released even on abnormal exit.
"""
import json
import sys


def respond(ok, **kwargs):
    print(json.dumps({"ok": ok, **kwargs}), flush=True)


def run(rknn, cmd):
    name = cmd.get("cmd")
    if name == "configure":
        rknn.config(
            mean_values=[cmd["mean"]],
            std_values=[cmd["std"]],
            target_platform=cmd["target"],
            quantized_algorithm="normal",
            quantized_method="channel",
            optimization_level=cmd.get("optimization_level", 3),
        )
        return 0
    if name == "load":
        if cmd["format"] == "onnx":
            return rknn.load_onnx(model=cmd["model"])
        return rknn.load_pytorch(model=cmd["model"],
                                 input_size_list=[cmd["input_size"]])
    if name == "build":
        return rknn.build(
            do_quantization=cmd["do_quantization"],
            dataset=cmd.get("dataset"),
            rknn_batch_size=1,
        )
    if name == "export":
        return rknn.export_rknn(cmd["output"])
    raise ValueError(f"unknown command: {name}")


def main():
    try:
        from rknn.api import RKNN
    except ImportError as e:
        respond(False, error=f"Missing rknn toolkit: {e}")
        sys.exit(1)

    rknn = RKNN(verbose=False)
    try:
        for line in sys.stdin:
            line = line.strip()
            if not line:
                continue
            try:
                cmd = json.loads(line)
            except json.JSONDecodeError as e:
                respond(False, error=f"bad command: {e}")
                continue
            if cmd.get("cmd") == "release":
                respond(True)
                break
            try:
                ret = run(rknn, cmd)
                if ret == 0:
                    respond(True)
                else:
                    respond(False, error=f"{cmd.get('cmd')} returned {ret}")
            except Exception as e:
                respond(False, error=str(e))
    finally:
        rknn.release()


if __name__ == "__main__":
    main()
"#;

/// Compute a short hash of a string for staleness checking.
fn content_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    let hash = hasher.finalize();
    hex::encode(&hash[..8])
}

/// Get the path to the toolchain scripts directory.
pub fn scripts_dir(root: &Path) -> PathBuf {
    root.join(PathsConfig::SCRIPTS_DIR_NAME)
}

/// Get the path to the toolchain virtual environment.
pub fn venv_dir(root: &Path) -> PathBuf {
    root.join(PathsConfig::VENV_DIR_NAME)
}

/// Get the path to the Python binary inside the toolchain venv.
pub fn venv_python(root: &Path) -> PathBuf {
    venv_dir(root).join("bin").join("python")
}

/// Deploy embedded scripts to disk if missing or outdated.
///
/// Uses a `.hash` sidecar file to detect when the embedded script has changed
/// and needs to be rewritten.
pub fn ensure_scripts_deployed(root: &Path) -> Result<()> {
    let dir = scripts_dir(root);
    std::fs::create_dir_all(&dir).map_err(|e| ForgeError::io_with_path(e, &dir))?;

    deploy_script(&dir, "export_graph.py", EXPORT_GRAPH_SCRIPT)?;
    deploy_script(&dir, "toolkit_driver.py", TOOLKIT_DRIVER_SCRIPT)?;
    deploy_script(&dir, "requirements.txt", REQUIREMENTS)?;

    debug!("Toolchain scripts deployed to {}", dir.display());
    Ok(())
}

fn deploy_script(dir: &Path, filename: &str, content: &str) -> Result<()> {
    let script_path = dir.join(filename);
    let hash_path = dir.join(format!("{filename}.hash"));
    let current_hash = content_hash(content);

    // Skip the write when the deployed copy is already current.
    if script_path.exists() {
        if let Ok(stored_hash) = std::fs::read_to_string(&hash_path) {
            if stored_hash.trim() == current_hash {
                return Ok(());
            }
        }
    }

    std::fs::write(&script_path, content)
        .map_err(|e| ForgeError::io_with_path(e, &script_path))?;
    std::fs::write(&hash_path, &current_hash)
        .map_err(|e| ForgeError::io_with_path(e, &hash_path))?;
    Ok(())
}

/// Check if the toolchain environment is ready.
pub fn is_environment_ready(root: &Path) -> bool {
    venv_python(root).exists()
}

/// Ensure the toolchain virtual environment is set up.
///
/// Creates the virtual environment and installs required packages if needed.
pub async fn ensure_environment(root: &Path) -> Result<()> {
    ensure_scripts_deployed(root)?;

    let venv_path = venv_dir(root);
    let python_path = venv_python(root);

    if python_path.exists() {
        debug!("Toolchain venv already exists at {}", venv_path.display());
        return Ok(());
    }

    info!("Creating toolchain virtual environment at {}", venv_path.display());

    let output = tokio::time::timeout(
        ToolkitConfig::VENV_CREATION_TIMEOUT,
        Command::new("python3")
            .args(["-m", "venv", &venv_path.to_string_lossy()])
            .output(),
    )
    .await
    .map_err(|_| ForgeError::Other("venv creation timed out".to_string()))?
    .map_err(|e| ForgeError::Other(format!("Failed to create venv: {e}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(ForgeError::Config {
            message: format!(
                "Failed to create Python venv. Ensure python3 is installed. Error: {stderr}"
            ),
        });
    }

    let output = Command::new(&python_path)
        .args(["-m", "pip", "install", "--upgrade", "pip"])
        .output()
        .await
        .map_err(|e| ForgeError::Other(format!("Failed to upgrade pip: {e}")))?;

    if !output.status.success() {
        warn!(
            "pip upgrade failed (non-fatal): {}",
            String::from_utf8_lossy(&output.stderr)
        );
    }

    let requirements_path = scripts_dir(root).join("requirements.txt");
    info!("Installing toolchain dependencies...");

    let output = Command::new(&python_path)
        .args([
            "-m",
            "pip",
            "install",
            "-r",
            &requirements_path.to_string_lossy(),
        ])
        .output()
        .await
        .map_err(|e| ForgeError::Other(format!("Failed to install dependencies: {e}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(ForgeError::Config {
            message: format!("Failed to install toolchain dependencies: {stderr}"),
        });
    }

    info!("Toolchain environment ready");
    Ok(())
}
