use anyhow::Result;
use voxlisten::audio;

/// Device names from `VOXLISTEN_TEST_DEVICES` (comma separated) when set.
fn test_devices() -> Option<Vec<String>> {
    let raw = std::env::var("VOXLISTEN_TEST_DEVICES").ok()?;
    Some(parse_device_list(&raw))
}

fn parse_device_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|item| item.trim().to_string())
        .filter(|item| !item.is_empty())
        .collect()
}

pub(crate) fn list_input_devices() -> Result<()> {
    let devices = test_devices().unwrap_or_else(|| {
        audio::list_input_devices().unwrap_or_else(|err| {
            eprintln!("Failed to list audio input devices: {err}");
            Vec::new()
        })
    });

    if devices.is_empty() {
        println!("No audio input devices detected.");
    } else {
        println!("Available audio input devices:");
        for name in devices {
            println!("  - {name}");
        }
    }
    Ok(())
}
