use byteorder::{ByteOrder, LittleEndian};
use tempfile::TempDir;

use hic_rs::api::image_io::ImageIo;
use hic_rs::error::HicError;
use hic_rs::layout::geometry::{self, ImageDescriptor};
use hic_rs::layout::meta::MetaValue;
use hic_rs::layout::region::{DatasetOverrides, RegionRequest};
use hic_rs::layout::types::ComponentType;
use hic_rs::store::{ContainerFile, Value};

fn init_logs() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn temp_file(dir: &TempDir, name: &str) -> String {
    dir.path().join(name).display().to_string()
}

/// Buffer filled with each element's linear index, truncated to the
/// component width.
fn pattern(desc: &ImageDescriptor) -> Vec<u8> {
    let n = desc.dimensions.iter().product::<u64>() * desc.components;
    let size = desc.component_type.size();
    let mut buf = vec![0u8; n as usize * size];
    for i in 0..n as usize {
        let chunk = &mut buf[i * size..(i + 1) * size];
        match size {
            1 => chunk[0] = i as u8,
            2 => LittleEndian::write_u16(chunk, i as u16),
            4 => LittleEndian::write_u32(chunk, i as u32),
            _ => LittleEndian::write_u64(chunk, i as u64),
        }
    }
    buf
}

fn write_image(file_name: &str, desc: &ImageDescriptor, voxels: &[u8]) {
    let mut io = ImageIo::new(file_name);
    io.set_descriptor(desc.clone());
    io.write(voxels).unwrap();
}

#[test]
fn round_trip_every_component_type() {
    init_logs();
    let dir = TempDir::new().unwrap();
    for component_type in ComponentType::ALL {
        for components in [1u64, 3] {
            let file_name = temp_file(
                &dir,
                &format!("{}-{components}.h5", component_type.name()),
            );
            let mut desc = ImageDescriptor::new(3);
            desc.dimensions = vec![4, 3, 2];
            desc.spacing = vec![0.5, 1.0, 2.5];
            desc.origin = vec![1.0, -2.0, 3.0];
            desc.components = components;
            desc.component_type = component_type;
            let voxels = pattern(&desc);
            write_image(&file_name, &desc, &voxels);

            let mut io = ImageIo::new(&file_name);
            io.read_information().unwrap();
            assert_eq!(io.descriptor(), &desc, "{file_name}");

            let mut back = vec![0u8; voxels.len()];
            io.read(&mut back).unwrap();
            assert_eq!(back, voxels, "{file_name}");
        }
    }
}

#[test]
fn metadata_tags_preserve_the_host_type() {
    init_logs();
    let dir = TempDir::new().unwrap();
    let file_name = temp_file(&dir, "tags.hdf5");

    let mut desc = ImageDescriptor::new(2);
    desc.dimensions = vec![2, 2];
    let voxels = pattern(&desc);

    let mut io = ImageIo::new(&file_name);
    io.set_descriptor(desc);
    io.set_use_metadata(true);
    let dict = io.dictionary_mut();
    dict.insert("flag", MetaValue::Bool(true));
    dict.insert("long", MetaValue::Long(-5));
    dict.insert("ulong", MetaValue::ULong(5));
    dict.insert("llong", MetaValue::LLong(-(1i64 << 40)));
    dict.insert("ullong", MetaValue::ULLong(1u64 << 40));
    dict.insert("plain", MetaValue::Int(7));
    dict.insert("text", MetaValue::String("patient A".to_string()));
    dict.insert("curve", MetaValue::DoubleArray(vec![0.25, 0.5, 1.0]));
    io.write(&voxels).unwrap();

    let mut io = ImageIo::new(&file_name);
    io.set_use_metadata(true);
    io.read_information().unwrap();
    let dict = io.dictionary();
    assert_eq!(dict.get("flag"), Some(&MetaValue::Bool(true)));
    assert_eq!(dict.get("long"), Some(&MetaValue::Long(-5)));
    assert_eq!(dict.get("ulong"), Some(&MetaValue::ULong(5)));
    assert_eq!(dict.get("llong"), Some(&MetaValue::LLong(-(1i64 << 40))));
    assert_eq!(dict.get("ullong"), Some(&MetaValue::ULLong(1u64 << 40)));
    assert_eq!(dict.get("plain"), Some(&MetaValue::Int(7)));
    assert_eq!(
        dict.get("text"),
        Some(&MetaValue::String("patient A".to_string()))
    );
    assert_eq!(
        dict.get("curve"),
        Some(&MetaValue::DoubleArray(vec![0.25, 0.5, 1.0]))
    );
    // dictionary order survives the round-trip
    let keys: Vec<&str> = dict.iter().map(|(k, _)| k).collect();
    assert_eq!(
        keys,
        vec!["flag", "long", "ulong", "llong", "ullong", "plain", "text", "curve"]
    );
}

#[test]
fn sub_region_read_returns_the_requested_voxels() {
    init_logs();
    let dir = TempDir::new().unwrap();
    let file_name = temp_file(&dir, "region.h5");

    let mut desc = ImageDescriptor::new(3);
    desc.dimensions = vec![10, 20, 30];
    desc.component_type = ComponentType::UInt32;
    let voxels = pattern(&desc);
    write_image(&file_name, &desc, &voxels);

    let mut io = ImageIo::new(&file_name);
    io.read_information().unwrap();
    io.set_io_region(Some(RegionRequest {
        index: vec![2, 3, 4],
        size:  vec![4, 5, 6],
    }));
    let mut dest = vec![0u8; 4 * 5 * 6 * 4];
    io.read(&mut dest).unwrap();

    for z in 0..6u32 {
        for y in 0..5u32 {
            for x in 0..4u32 {
                let i = ((x + 4 * (y + 5 * z)) * 4) as usize;
                let got = LittleEndian::read_u32(&dest[i..i + 4]);
                let expected = (x + 2) + 10 * (y + 3) + 200 * (z + 4);
                assert_eq!(got, expected, "voxel ({x},{y},{z})");
            }
        }
    }
}

#[test]
fn stride_override_halves_the_extent_and_doubles_spacing() {
    init_logs();
    let dir = TempDir::new().unwrap();
    let file_name = temp_file(&dir, "stride.h5");

    let mut desc = ImageDescriptor::new(1);
    desc.dimensions = vec![10];
    let voxels = pattern(&desc);
    write_image(&file_name, &desc, &voxels);

    let mut io = ImageIo::new(&file_name);
    io.set_overrides(DatasetOverrides {
        stride: Some(vec![2]),
        ..Default::default()
    });
    io.read_information().unwrap();
    assert_eq!(io.descriptor().dimensions, vec![5]);
    assert_eq!(io.descriptor().spacing, vec![2.0]);

    let mut dest = vec![0u8; 5];
    io.read(&mut dest).unwrap();
    assert_eq!(dest, vec![0, 2, 4, 6, 8]);
}

#[test]
fn offset_past_the_strided_extent_is_a_typed_error() {
    init_logs();
    let dir = TempDir::new().unwrap();
    let file_name = temp_file(&dir, "offstride.h5");

    let mut desc = ImageDescriptor::new(1);
    desc.dimensions = vec![10];
    write_image(&file_name, &desc, &pattern(&desc));

    let mut io = ImageIo::new(&file_name);
    io.set_overrides(DatasetOverrides {
        offset: Some(vec![6]),
        stride: Some(vec![2]),
        ..Default::default()
    });
    let err = io.read_information().unwrap_err();
    assert!(matches!(err, HicError::SelectionOutOfBounds { .. }));

    // a combination that stays inside the strided extent still works
    let mut io = ImageIo::new(&file_name);
    io.set_overrides(DatasetOverrides {
        offset: Some(vec![2]),
        stride: Some(vec![2]),
        ..Default::default()
    });
    io.read_information().unwrap();
    assert_eq!(io.descriptor().dimensions, vec![3]);
    let mut dest = vec![0u8; 3];
    io.read(&mut dest).unwrap();
    assert_eq!(dest, vec![2, 4, 6]);
}

#[test]
fn write_information_is_idempotent_within_a_session() {
    init_logs();
    let dir = TempDir::new().unwrap();
    let file_name = temp_file(&dir, "idem.h5");

    let mut desc = ImageDescriptor::new(2);
    desc.dimensions = vec![3, 3];

    let mut io = ImageIo::new(&file_name);
    io.set_descriptor(desc);
    io.write_information().unwrap();
    let once = std::fs::read(&file_name).unwrap();
    io.write_information().unwrap();
    let twice = std::fs::read(&file_name).unwrap();
    assert_eq!(once, twice);
}

#[test]
fn existing_dataset_requires_the_overwrite_flag() {
    init_logs();
    let dir = TempDir::new().unwrap();
    let file_name = temp_file(&dir, "guard.h5");

    let mut desc = ImageDescriptor::new(2);
    desc.dimensions = vec![2, 2];
    let voxels = pattern(&desc);
    write_image(&file_name, &desc, &voxels);

    let mut io = ImageIo::new(&file_name);
    io.set_descriptor(desc.clone());
    let err = io.write_information().unwrap_err();
    assert!(matches!(err, HicError::AlreadyExists(_)));

    // overwrite replaces the old content
    let replacement = vec![9u8; voxels.len()];
    let mut io = ImageIo::new(&file_name);
    io.set_descriptor(desc);
    io.set_overwrite(true);
    io.write(&replacement).unwrap();

    let mut io = ImageIo::new(&file_name);
    io.read_information().unwrap();
    let mut back = vec![0u8; replacement.len()];
    io.read(&mut back).unwrap();
    assert_eq!(back, replacement);
}

#[test]
fn rank_one_directions_attribute_is_malformed() {
    init_logs();
    let dir = TempDir::new().unwrap();
    let file_name = temp_file(&dir, "directions.h5");

    let mut file = ContainerFile::create(file_name.as_ref()).unwrap();
    file.create_dataset(
        "/",
        "data",
        Value::zeroed(hic_rs::store::ScalarType::U8, vec![2, 2]),
        None,
    )
    .unwrap();
    let ds = file.dataset_at_mut("/data").unwrap();
    ds.set_attr(geometry::DIRECTIONS, Value::vector_f64(&[1.0, 0.0, 0.0, 1.0]));
    file.flush().unwrap();

    let mut io = ImageIo::new(&file_name);
    let err = io.read_information().unwrap_err();
    assert!(matches!(err, HicError::MalformedLayout(_)));
}

#[test]
fn read_probe_rejects_missing_and_foreign_files() {
    init_logs();
    let dir = TempDir::new().unwrap();
    assert!(!ImageIo::can_read(&temp_file(&dir, "absent.h5")));

    let foreign = temp_file(&dir, "foreign.h5");
    std::fs::write(&foreign, b"not a container file at all").unwrap();
    assert!(!ImageIo::can_read(&foreign));

    let real = temp_file(&dir, "real.h5");
    let mut desc = ImageDescriptor::new(2);
    desc.dimensions = vec![2, 2];
    write_image(&real, &desc, &pattern(&desc));
    assert!(ImageIo::can_read(&real));
}

#[test]
fn missing_metadata_group_is_an_error_only_when_requested() {
    init_logs();
    let dir = TempDir::new().unwrap();
    let file_name = temp_file(&dir, "nometa.h5");

    let mut desc = ImageDescriptor::new(2);
    desc.dimensions = vec![2, 2];
    write_image(&file_name, &desc, &pattern(&desc));

    let mut io = ImageIo::new(&file_name);
    io.read_information().unwrap();

    let mut io = ImageIo::new(&file_name);
    io.set_use_metadata(true);
    assert!(matches!(
        io.read_information().unwrap_err(),
        HicError::NotFound(_)
    ));
}

#[test]
fn custom_path_and_compression_round_trip() {
    init_logs();
    let dir = TempDir::new().unwrap();
    let file_name = temp_file(&dir, "deep.h5");

    let mut desc = ImageDescriptor::new(3);
    desc.dimensions = vec![8, 8, 8];
    desc.component_type = ComponentType::Float32;
    let voxels = pattern(&desc);

    let mut io = ImageIo::new(&file_name);
    io.set_path("/exam/series0");
    io.set_dataset_name("volume");
    io.set_use_compression(true);
    io.set_compression_level(7);
    io.set_descriptor(desc.clone());
    io.write(&voxels).unwrap();

    let mut io = ImageIo::new(&file_name);
    io.set_path("/exam/series0");
    io.set_dataset_name("volume");
    assert!(io.dataset_exists());
    io.read_information().unwrap();
    assert_eq!(io.descriptor(), &desc);
    let mut back = vec![0u8; voxels.len()];
    io.read(&mut back).unwrap();
    assert_eq!(back, voxels);
}

#[test]
fn sub_region_write_updates_only_the_selection() {
    init_logs();
    let dir = TempDir::new().unwrap();
    let file_name = temp_file(&dir, "partial.h5");

    let mut desc = ImageDescriptor::new(2);
    desc.dimensions = vec![4, 4];
    let voxels = pattern(&desc);
    write_image(&file_name, &desc, &voxels);

    // a second session patches a 2x2 window without touching the rest
    let mut io = ImageIo::new(&file_name);
    io.set_descriptor(desc.clone());
    io.set_overwrite(true);
    io.write_information().unwrap();
    io.set_io_region(Some(RegionRequest {
        index: vec![1, 1],
        size:  vec![2, 2],
    }));
    io.write(&[100, 101, 102, 103]).unwrap();

    let mut io = ImageIo::new(&file_name);
    io.read_information().unwrap();
    let mut back = vec![0u8; 16];
    io.read(&mut back).unwrap();
    // overwrite recreated the dataset, so voxels outside the patched
    // window are zero
    let mut expected = vec![0u8; 16];
    expected[5] = 100;
    expected[6] = 101;
    expected[9] = 102;
    expected[10] = 103;
    assert_eq!(back, expected);
}
