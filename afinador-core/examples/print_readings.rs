//! Minimal headless consumer: open the default input device and print the
//! published readings for ten seconds.
//!
//! ```sh
//! RUST_LOG=info cargo run --example print_readings
//! ```

use std::thread;
use std::time::Duration;

use afinador_core::audio;
use afinador_core::tuner::Tuner;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    for device in audio::input_devices()? {
        println!("input device: {}", device.label);
    }

    let mut tuner = Tuner::new();
    tuner.open_default()?;

    for _ in 0..200 {
        thread::sleep(Duration::from_millis(50));
        let reading = tuner.reading();
        match reading.note {
            Some(note) => println!(
                "{:>4}  {:8.2} Hz  {:+6.1} cents  {}  (level {:.3})",
                note.name(),
                reading.frequency.unwrap_or_default(),
                note.display_cents(),
                note.label,
                reading.level,
            ),
            None => println!("  --         -- Hz      -- cents  (level {:.3})", reading.level),
        }
    }

    tuner.close();
    Ok(())
}
