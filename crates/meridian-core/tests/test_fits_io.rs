use std::io::Write;

use ndarray::Array2;

use meridian_core::error::MeridianError;
use meridian_core::frame::{Frame, ImageType};
use meridian_core::io::fits::{read_fits, read_fits_header, write_fits, FitsHeader, FitsValue};

#[test]
fn roundtrip_preserves_data_and_header() {
    let dir = tempfile::tempdir().unwrap();
    let data = Array2::from_shape_fn((12, 10), |(r, c)| (r * 10 + c) as f64 * 1.5 - 7.25);

    let mut header = FitsHeader::new();
    header.set_float("EXPTIME", 300.0);
    header.set_int("GAIN", 100);
    header.set_string("FILTER", "Ha");
    header.set_string("IMAGETYP", "Light Frame");
    header.set_bool("CALIBRTD", false);
    header.set_float("CCD-TEMP", -10.5);

    let path = dir.path().join("frame.fits");
    write_fits(&path, &Frame::new(data.clone(), header)).unwrap();

    let frame = read_fits(&path).unwrap();
    assert_eq!(frame.shape(), (12, 10));
    for ((r, c), v) in data.indexed_iter() {
        assert_eq!(frame.data[[r, c]], *v, "pixel ({r},{c})");
    }
    assert_eq!(frame.exposure_time(), Some(300.0));
    assert_eq!(frame.gain(), Some(100.0));
    assert_eq!(frame.filter().as_deref(), Some("Ha"));
    assert_eq!(frame.image_type(), Some(ImageType::Light));
    assert_eq!(frame.header.get_bool("CALIBRTD"), Some(false));
    assert_eq!(frame.header.get_float("CCD-TEMP"), Some(-10.5));
}

#[test]
fn overwrite_replaces_existing_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("frame.fits");

    let first = Array2::from_elem((8, 8), 1.0);
    write_fits(&path, &Frame::new(first, FitsHeader::new())).unwrap();

    let second = Array2::from_elem((4, 4), 2.0);
    write_fits(&path, &Frame::new(second, FitsHeader::new())).unwrap();

    let frame = read_fits(&path).unwrap();
    assert_eq!(frame.shape(), (4, 4));
    assert_eq!(frame.data[[0, 0]], 2.0);
}

#[test]
fn truncated_data_is_invalid() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("frame.fits");
    write_fits(
        &path,
        &Frame::new(Array2::from_elem((64, 64), 5.0), FitsHeader::new()),
    )
    .unwrap();

    // Chop the data unit short.
    let bytes = std::fs::read(&path).unwrap();
    let truncated = &bytes[..bytes.len() - 2880];
    let mut f = std::fs::File::create(&path).unwrap();
    f.write_all(truncated).unwrap();

    match read_fits(&path) {
        Err(MeridianError::InvalidFits { .. }) => {}
        other => panic!("expected InvalidFits, got {other:?}"),
    }
}

#[test]
fn not_a_fits_file_is_invalid() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("junk.fits");
    std::fs::write(&path, vec![0u8; 5000]).unwrap();
    assert!(matches!(
        read_fits(&path),
        Err(MeridianError::InvalidFits { .. })
    ));
}

#[test]
fn header_only_read_skips_data() {
    let dir = tempfile::tempdir().unwrap();
    let mut header = FitsHeader::new();
    header.set_string("FILTER", "R");
    let path = dir.path().join("frame.fits");
    write_fits(
        &path,
        &Frame::new(Array2::from_elem((32, 32), 9.0), header),
    )
    .unwrap();

    let header = read_fits_header(&path).unwrap();
    assert_eq!(header.get_string("FILTER"), Some("R"));
    assert_eq!(header.get_int("NAXIS1"), Some(32));
}

#[test]
fn scaled_integer_data_applies_bzero() {
    // Hand-build a BITPIX=16 file with BZERO=32768, the unsigned-16
    // convention used by capture software.
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("int16.fits");

    let mut cards: Vec<u8> = Vec::new();
    let mut push = |s: String| {
        let mut card = s.into_bytes();
        card.resize(80, b' ');
        cards.extend_from_slice(&card);
    };
    push(format!("{:<8}= {:>20}", "SIMPLE", "T"));
    push(format!("{:<8}= {:>20}", "BITPIX", 16));
    push(format!("{:<8}= {:>20}", "NAXIS", 2));
    push(format!("{:<8}= {:>20}", "NAXIS1", 2));
    push(format!("{:<8}= {:>20}", "NAXIS2", 2));
    push(format!("{:<8}= {:>20}", "BZERO", "32768.0"));
    push(format!("{:<8}= {:>20}", "BSCALE", "1.0"));
    push("END".to_string());
    cards.resize(2880, b' ');

    // Raw signed values -32768..=-32765 decode to 0..=3 ADU.
    for raw in [-32768i16, -32767, -32766, -32765] {
        cards.extend_from_slice(&raw.to_be_bytes());
    }
    cards.resize(2880 * 2, 0);
    std::fs::write(&path, cards).unwrap();

    let frame = read_fits(&path).unwrap();
    assert_eq!(frame.data[[0, 0]], 0.0);
    assert_eq!(frame.data[[0, 1]], 1.0);
    assert_eq!(frame.data[[1, 0]], 2.0);
    assert_eq!(frame.data[[1, 1]], 3.0);
    // Scaling keys are consumed on read, not re-applied on write.
    assert!(frame.header.get("BZERO").is_none());
}
