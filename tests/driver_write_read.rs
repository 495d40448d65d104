use gridfile::chunk_cache::{ChunkCacheOptions, WritePolicy};
use gridfile::container::ContainerError;
use gridfile::driver::{Driver, DriverError, DriverSpec, OpenMode, OpenOptions};
use gridfile::schema::SchemaError;

fn spec(path: &std::path::Path, json: serde_json::Value) -> DriverSpec {
    let mut json = json;
    json.as_object_mut()
        .unwrap()
        .insert("path".to_string(), serde_json::json!(path));
    serde_json::from_value(json).unwrap()
}

fn f32_bytes(values: &[f32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_ne_bytes()).collect()
}

#[test]
fn driver_create_write_read() -> Result<(), Box<dyn std::error::Error>> {
    let tmp = tempfile::TempDir::new()?;
    let spec = spec(
        &tmp.path().join("create.gcf"),
        serde_json::json!({
            "driver": "hdf5",
            "dataset": "/data",
            "dtype": "float32",
            "shape": [10, 10],
            "chunk_layout": {"chunk": [5, 5]}
        }),
    );
    let driver = Driver::open(&spec, &OpenOptions::new(OpenMode::Create))?;
    assert_eq!(driver.shape(), &[10, 10]);
    assert_eq!(driver.chunk_layout().chunk, vec![5, 5]);
    assert_eq!(driver.chunk_layout().grid_origin, vec![0, 0]);
    assert_eq!(driver.chunk_layout().inner_order, vec![0, 1]);
    let schema = driver.schema();
    assert_eq!(schema.dtype, Some(gridfile::data_type::DataType::Float32));
    assert_eq!(schema.shape, Some(vec![10, 10]));

    let data = f32_bytes(&[1.5; 100]);
    driver.write_region(&[0, 0], &[10, 10], &data)?;
    let mut readback = vec![0u8; data.len()];
    driver.read_region(&[0, 0], &[10, 10], &mut readback)?;
    assert_eq!(readback, data);

    driver.flush()?;
    assert!(driver.storage_size()? > 0);

    // Creating the same dataset again is an error.
    assert!(matches!(
        Driver::open(&spec, &OpenOptions::new(OpenMode::Create)),
        Err(DriverError::Container(ContainerError::AlreadyExists(_)))
    ));
    Ok(())
}

#[test]
fn driver_open_dtype_mismatch() -> Result<(), Box<dyn std::error::Error>> {
    let tmp = tempfile::TempDir::new()?;
    let path = tmp.path().join("mismatch.gcf");
    let create = spec(
        &path,
        serde_json::json!({
            "driver": "hdf5",
            "dataset": "/data",
            "dtype": "float32",
            "shape": [10, 10],
            "chunk_layout": {"chunk": [5, 5]}
        }),
    );
    Driver::open(&create, &OpenOptions::new(OpenMode::Create))?;

    let reopen = spec(
        &path,
        serde_json::json!({
            "driver": "hdf5",
            "dataset": "/data",
            "dtype": "int32"
        }),
    );
    assert!(matches!(
        Driver::open(&reopen, &OpenOptions::default()),
        Err(DriverError::Schema(SchemaError::DtypeMismatch { .. }))
    ));

    // Matching metadata constraints open fine.
    let constrained = spec(
        &path,
        serde_json::json!({
            "driver": "hdf5",
            "dataset": "/data",
            "metadata": {"shape": [10, 10], "chunk_shape": [5, 5], "dtype": "float32"}
        }),
    );
    let driver = Driver::open(&constrained, &OpenOptions::default())?;
    assert_eq!(driver.dtype().identifier(), "float32");

    let bad_chunk = spec(
        &path,
        serde_json::json!({
            "driver": "hdf5",
            "dataset": "/data",
            "metadata": {"chunk_shape": [2, 2]}
        }),
    );
    assert!(matches!(
        Driver::open(&bad_chunk, &OpenOptions::default()),
        Err(DriverError::Schema(SchemaError::ShapeMismatch { .. }))
    ));
    Ok(())
}

#[test]
fn driver_open_not_found() {
    let tmp = tempfile::TempDir::new().unwrap();
    let spec = spec(
        &tmp.path().join("nonexistent.gcf"),
        serde_json::json!({
            "driver": "hdf5",
            "dataset": "/data"
        }),
    );
    assert!(matches!(
        Driver::open(&spec, &OpenOptions::new(OpenMode::ReadOnly)),
        Err(DriverError::Container(ContainerError::NotFound(_)))
    ));
}

#[test]
fn driver_partial_edge_chunks() -> Result<(), Box<dyn std::error::Error>> {
    let tmp = tempfile::TempDir::new()?;
    let spec = spec(
        &tmp.path().join("edge.gcf"),
        serde_json::json!({
            "driver": "hdf5",
            "dataset": "/edge",
            "dtype": "uint8",
            "shape": [7],
            "chunk_layout": {"chunk": [3]}
        }),
    );
    let data: Vec<u8> = (10..17).collect();
    {
        let driver = Driver::open(&spec, &OpenOptions::new(OpenMode::Create))?;
        driver.write_region(&[0], &[7], &data)?;
        driver.flush()?;
    }

    let driver = Driver::open(&spec, &OpenOptions::default())?;
    let mut readback = vec![0u8; 7];
    driver.read_region(&[0], &[7], &mut readback)?;
    assert_eq!(readback, data);

    // Reading the full extent touches chunks (0), (1), (2); the last chunk
    // serves a single element.
    assert_eq!(driver.cache_stats().misses, 3);
    let mut last = vec![0u8; 1];
    driver.read_region(&[6], &[1], &mut last)?;
    assert_eq!(last, vec![16]);
    Ok(())
}

#[test]
fn driver_bounds_and_zero_extent() -> Result<(), Box<dyn std::error::Error>> {
    let tmp = tempfile::TempDir::new()?;
    let spec = spec(
        &tmp.path().join("bounds.gcf"),
        serde_json::json!({
            "driver": "hdf5",
            "dataset": "/b",
            "dtype": "uint8",
            "shape": [4, 4],
            "chunk_layout": {"chunk": [2, 2]}
        }),
    );
    let driver = Driver::open(&spec, &OpenOptions::new(OpenMode::Create))?;

    let mut out = vec![0u8; 8];
    assert!(matches!(
        driver.read_region(&[2, 2], &[2, 4], &mut out),
        Err(DriverError::OutOfBounds(..))
    ));
    assert!(matches!(
        driver.write_region(&[0], &[4], &out),
        Err(DriverError::OutOfBounds(..))
    ));
    assert!(matches!(
        driver.read_region(&[0, 0], &[2, 2], &mut out),
        Err(DriverError::InvalidArgument(_))
    ));

    // A zero-extent region enumerates no chunks and performs no IO.
    driver.read_region(&[2, 2], &[0, 2], &mut [])?;
    driver.write_region(&[2, 2], &[0, 2], &[])?;
    assert_eq!(driver.cache_stats().misses, 0);
    Ok(())
}

#[test]
fn driver_scalar_dataset() -> Result<(), Box<dyn std::error::Error>> {
    let tmp = tempfile::TempDir::new()?;
    let spec = spec(
        &tmp.path().join("scalar.gcf"),
        serde_json::json!({
            "driver": "hdf5",
            "dataset": "/scalar",
            "dtype": "float64",
            "shape": []
        }),
    );
    let driver = Driver::open(&spec, &OpenOptions::new(OpenMode::Create))?;
    assert_eq!(driver.rank(), 0);
    driver.write_region(&[], &[], &42.0f64.to_ne_bytes())?;
    let mut out = [0u8; 8];
    driver.read_region(&[], &[], &mut out)?;
    assert_eq!(f64::from_ne_bytes(out), 42.0);
    Ok(())
}

#[test]
fn driver_read_modify_write() -> Result<(), Box<dyn std::error::Error>> {
    let tmp = tempfile::TempDir::new()?;
    let spec = spec(
        &tmp.path().join("rmw.gcf"),
        serde_json::json!({
            "driver": "hdf5",
            "dataset": "/rmw",
            "dtype": "uint8",
            "shape": [6, 6],
            "chunk_layout": {"chunk": [4, 4]}
        }),
    );
    let driver = Driver::open(&spec, &OpenOptions::new(OpenMode::Create))?;
    driver.write_region(&[0, 0], &[6, 6], &vec![1u8; 36])?;
    // An unaligned interior write forces read-modify-write on all four
    // chunks.
    driver.write_region(&[2, 2], &[2, 2], &[9, 9, 9, 9])?;
    let mut readback = vec![0u8; 36];
    driver.read_region(&[0, 0], &[6, 6], &mut readback)?;
    let expected: Vec<u8> = (0..36)
        .map(|i| {
            let (row, col) = (i / 6, i % 6);
            if (2..4).contains(&row) && (2..4).contains(&col) {
                9
            } else {
                1
            }
        })
        .collect();
    assert_eq!(readback, expected);
    Ok(())
}

#[test]
fn driver_write_read_identity_across_eviction() -> Result<(), Box<dyn std::error::Error>> {
    let tmp = tempfile::TempDir::new()?;
    let spec = spec(
        &tmp.path().join("evict.gcf"),
        serde_json::json!({
            "driver": "hdf5",
            "dataset": "/e",
            "dtype": "uint8",
            "shape": [8, 8],
            "chunk_layout": {"chunk": [4, 4]}
        }),
    );
    let driver = Driver::open(&spec, &OpenOptions::new(OpenMode::Create))?;
    let data: Vec<u8> = (0..64).collect();
    driver.write_region(&[0, 0], &[8, 8], &data)?;
    // Dirty entries are written back before removal.
    driver.evict_to(0)?;
    assert_eq!(driver.cache_stats().entries, 0);
    let mut readback = vec![0u8; 64];
    driver.read_region(&[0, 0], &[8, 8], &mut readback)?;
    assert_eq!(readback, data);
    Ok(())
}

#[test]
fn driver_gzip_levels_storage_size() -> Result<(), Box<dyn std::error::Error>> {
    let tmp = tempfile::TempDir::new()?;
    let pattern: Vec<u8> = (0..10_000u32).map(|i| (i % 10) as u8).collect();
    let mut sizes = vec![];
    for level in [9, 1] {
        let spec = spec(
            &tmp.path().join(format!("gzip{level}.gcf")),
            serde_json::json!({
                "driver": "hdf5",
                "dataset": "/z",
                "dtype": "uint8",
                "shape": [100, 100],
                "chunk_layout": {"chunk": [50, 50]},
                "compression": {"id": "gzip", "level": level}
            }),
        );
        let driver = Driver::open(&spec, &OpenOptions::new(OpenMode::Create))?;
        driver.write_region(&[0, 0], &[100, 100], &pattern)?;
        driver.flush()?;
        sizes.push(driver.storage_size()?);
    }
    assert!(sizes[0] <= sizes[1], "sizes: {sizes:?}");
    assert!(sizes[1] < 10_000);
    Ok(())
}

#[test]
fn driver_attributes() -> Result<(), Box<dyn std::error::Error>> {
    let tmp = tempfile::TempDir::new()?;
    let spec = spec(
        &tmp.path().join("attrs.gcf"),
        serde_json::json!({
            "driver": "hdf5",
            "dataset": "/a",
            "dtype": "uint8",
            "shape": [1]
        }),
    );
    let driver = Driver::open(&spec, &OpenOptions::new(OpenMode::Create))?;
    let info = serde_json::json!({"v": 1, "tags": ["a", "b"]});
    driver.set_attribute("info", &info)?;
    assert_eq!(driver.attribute_names(), vec!["info"]);
    assert_eq!(driver.attribute("info")?, info);
    assert!(matches!(
        driver.attribute("missing"),
        Err(DriverError::Container(ContainerError::NotFound(_)))
    ));
    Ok(())
}

#[test]
fn driver_write_through() -> Result<(), Box<dyn std::error::Error>> {
    let tmp = tempfile::TempDir::new()?;
    let path = tmp.path().join("through.gcf");
    let spec = spec(
        &path,
        serde_json::json!({
            "driver": "hdf5",
            "dataset": "/t",
            "dtype": "uint8",
            "shape": [4],
            "chunk_layout": {"chunk": [2]}
        }),
    );
    let options = OpenOptions {
        mode: OpenMode::Create,
        cache: ChunkCacheOptions {
            write_policy: WritePolicy::WriteThrough,
            ..ChunkCacheOptions::default()
        },
    };
    let driver = Driver::open(&spec, &options)?;
    driver.write_region(&[0], &[4], &[1, 2, 3, 4])?;
    assert_eq!(driver.cache_stats().dirty_count, 0);
    Ok(())
}
