use std::sync::Arc;
use std::time::Duration;

use gridfile::chunk_cache::{ChunkCacheOptions, WritePolicy};
use gridfile::driver::{Driver, DriverSpec, OpenMode, OpenOptions};

fn spec(path: &std::path::Path, json: serde_json::Value) -> DriverSpec {
    let mut json = json;
    json.as_object_mut()
        .unwrap()
        .insert("path".to_string(), serde_json::json!(path));
    serde_json::from_value(json).unwrap()
}

fn write_back_options(mode: OpenMode, interval: Duration) -> OpenOptions {
    OpenOptions {
        mode,
        cache: ChunkCacheOptions {
            write_policy: WritePolicy::WriteBack,
            write_interval: interval,
            capacity: None,
        },
    }
}

#[test]
fn driver_write_back_durability() -> Result<(), Box<dyn std::error::Error>> {
    let tmp = tempfile::TempDir::new()?;
    let path = tmp.path().join("durability.gcf");
    let spec = spec(
        &path,
        serde_json::json!({
            "driver": "hdf5",
            "dataset": "/d",
            "dtype": "uint8",
            "shape": [100, 100],
            "chunk_layout": {"chunk": [10, 10]}
        }),
    );
    {
        // A long interval: the background writer never fires before the
        // driver is stopped; durability comes from the shutdown drain.
        let mut driver = Driver::open(
            &spec,
            &write_back_options(OpenMode::Create, Duration::from_secs(5)),
        )?;
        // One write per chunk, 100 chunks in total.
        for row in 0..10u8 {
            for col in 0..10u8 {
                let value = row.wrapping_mul(10).wrapping_add(col);
                driver.write_region(
                    &[u64::from(row) * 10, u64::from(col) * 10],
                    &[10, 10],
                    &[value; 100],
                )?;
            }
        }
        driver.stop();
    }

    let driver = Driver::open(
        &spec,
        &write_back_options(OpenMode::ReadOnly, Duration::from_secs(5)),
    )?;
    let mut readback = vec![0u8; 100 * 100];
    driver.read_region(&[0, 0], &[100, 100], &mut readback)?;
    for row in 0..100 {
        for col in 0..100 {
            let expected = ((row / 10) * 10 + col / 10) as u8;
            assert_eq!(readback[row * 100 + col], expected, "({row}, {col})");
        }
    }
    Ok(())
}

#[test]
fn driver_concurrent_writers() -> Result<(), Box<dyn std::error::Error>> {
    let tmp = tempfile::TempDir::new()?;
    let spec = spec(
        &tmp.path().join("concurrent.gcf"),
        serde_json::json!({
            "driver": "hdf5",
            "dataset": "/c",
            "dtype": "uint8",
            "shape": [100, 100],
            "chunk_layout": {"chunk": [20, 20]}
        }),
    );
    let driver = Arc::new(Driver::open(
        &spec,
        &write_back_options(OpenMode::Create, Duration::from_millis(50)),
    )?);

    let threads: Vec<_> = [0xAAu8, 0xBBu8]
        .into_iter()
        .map(|value| {
            let driver = driver.clone();
            std::thread::spawn(move || {
                // A fixed-seed linear congruential sequence of offsets.
                let mut state = u64::from(value);
                for _ in 0..1000 {
                    state = state
                        .wrapping_mul(6_364_136_223_846_793_005)
                        .wrapping_add(1_442_695_040_888_963_407);
                    let row = (state >> 33) % 91;
                    let col = (state >> 13) % 91;
                    driver
                        .write_region(&[row, col], &[10, 10], &[value; 100])
                        .unwrap();
                }
            })
        })
        .collect();
    for thread in threads {
        thread.join().unwrap();
    }

    driver.flush()?;
    let mut readback = vec![0u8; 100 * 100];
    driver.read_region(&[0, 0], &[100, 100], &mut readback)?;
    // Every byte is untouched or carries one of the written patterns.
    assert!(readback
        .iter()
        .all(|&byte| byte == 0 || byte == 0xAA || byte == 0xBB));
    assert!(readback.iter().any(|&byte| byte == 0xAA));
    assert!(readback.iter().any(|&byte| byte == 0xBB));
    Ok(())
}
