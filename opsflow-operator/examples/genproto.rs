//! Generate updated proto code for the fleet client.
//!
//! This is setup as an example instead of as part of the build.rs so that builds do not require
//! `protoc`. Run it from the crate root after changing `proto/fleet.proto`.

use anyhow::{Context, Result};

fn main() -> Result<()> {
    tonic_build::configure()
        .out_dir("src/grpc")
        .build_client(true)
        .build_server(false)
        .compile(&["../proto/fleet.proto"], &["../proto"])
        .context("error compiling fleet proto")?;

    Ok(())
}
