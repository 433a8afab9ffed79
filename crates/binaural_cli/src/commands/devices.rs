use anyhow::Result;

use binaural::{AudioBackend, CpalBackend};

pub fn devices() -> Result<()> {
    let backend = CpalBackend::new();

    println!("Inputs:");
    for d in backend.input_devices()? {
        println!("  {d}");
    }
    println!("Outputs:");
    for d in backend.output_devices()? {
        println!("  {d}");
    }
    Ok(())
}
