// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use heif_meta_parse::{
    BoxBody, BoxSize, ByteRange, ColourInformation, ConstructionMethod, Error, HeifParser, MAX_BOX_DEPTH, ParseConfig,
};
use std::borrow::Cow;

fn init_logger() {
    let _ = env_logger::builder().is_test(true).filter_level(log::LevelFilter::max()).try_init();
}

// ============================================================================
// Box builders
// ============================================================================

fn make_box(name: &[u8; 4], payload: &[u8]) -> Vec<u8> {
    let size = u32::try_from(8 + payload.len()).unwrap();
    let mut b = Vec::with_capacity(8 + payload.len());
    b.extend_from_slice(&size.to_be_bytes());
    b.extend_from_slice(name);
    b.extend_from_slice(payload);
    b
}

fn full_box(name: &[u8; 4], version: u8, flags: u32, payload: &[u8]) -> Vec<u8> {
    let mut p = vec![version];
    p.extend_from_slice(&flags.to_be_bytes()[1..]);
    p.extend_from_slice(payload);
    make_box(name, &p)
}

fn ftyp() -> Vec<u8> {
    make_box(b"ftyp", b"heic\0\0\0\0mif1heic")
}

fn meta(children: &[Vec<u8>]) -> Vec<u8> {
    full_box(b"meta", 0, 0, &children.concat())
}

fn hdlr() -> Vec<u8> {
    let mut p = vec![0; 4];
    p.extend_from_slice(b"pict");
    p.extend_from_slice(&[0; 12]);
    p.extend_from_slice(b"\0");
    full_box(b"hdlr", 0, 0, &p)
}

fn pitm(item_id: u16) -> Vec<u8> {
    full_box(b"pitm", 0, 0, &item_id.to_be_bytes())
}

fn infe(item_id: u16, item_type: &[u8; 4]) -> Vec<u8> {
    let mut p = item_id.to_be_bytes().to_vec();
    p.extend_from_slice(&[0, 0]);
    p.extend_from_slice(item_type);
    p.extend_from_slice(b"\0");
    full_box(b"infe", 2, 0, &p)
}

fn iinf(entries: &[Vec<u8>]) -> Vec<u8> {
    let mut p = u16::try_from(entries.len()).unwrap().to_be_bytes().to_vec();
    p.extend_from_slice(&entries.concat());
    full_box(b"iinf", 0, 0, &p)
}

struct Item<'a> {
    id: u32,
    construction_method: u16,
    data_reference_index: u16,
    base_offset: u64,
    extents: &'a [(u64, u64)],
}

impl<'a> Item<'a> {
    fn new(id: u32, extents: &'a [(u64, u64)]) -> Self {
        Self { id, construction_method: 0, data_reference_index: 0, base_offset: 0, extents }
    }
}

fn write_sized(buf: &mut Vec<u8>, value: u64, size: u8) {
    match size {
        4 => buf.extend_from_slice(&u32::try_from(value).unwrap().to_be_bytes()),
        8 => buf.extend_from_slice(&value.to_be_bytes()),
        _ => unreachable!(),
    }
}

/// offset, length and base offset all use `field_size` bytes; no extent index.
fn iloc(version: u8, field_size: u8, items: &[Item<'_>]) -> Vec<u8> {
    let mut p = vec![(field_size << 4) | field_size, field_size << 4];
    if version < 2 {
        p.extend_from_slice(&u16::try_from(items.len()).unwrap().to_be_bytes());
    } else {
        p.extend_from_slice(&u32::try_from(items.len()).unwrap().to_be_bytes());
    }
    for item in items {
        if version < 2 {
            p.extend_from_slice(&u16::try_from(item.id).unwrap().to_be_bytes());
        } else {
            p.extend_from_slice(&item.id.to_be_bytes());
        }
        if version > 0 {
            p.extend_from_slice(&item.construction_method.to_be_bytes());
        }
        p.extend_from_slice(&item.data_reference_index.to_be_bytes());
        write_sized(&mut p, item.base_offset, field_size);
        p.extend_from_slice(&u16::try_from(item.extents.len()).unwrap().to_be_bytes());
        for &(offset, length) in item.extents {
            write_sized(&mut p, offset, field_size);
            write_sized(&mut p, length, field_size);
        }
    }
    full_box(b"iloc", version, 0, &p)
}

fn reference(reference_type: &[u8; 4], from: u16, to: &[u16]) -> Vec<u8> {
    let mut p = from.to_be_bytes().to_vec();
    p.extend_from_slice(&u16::try_from(to.len()).unwrap().to_be_bytes());
    for id in to {
        p.extend_from_slice(&id.to_be_bytes());
    }
    make_box(reference_type, &p)
}

fn iref(references: &[Vec<u8>]) -> Vec<u8> {
    full_box(b"iref", 0, 0, &references.concat())
}

fn ispe(width: u32, height: u32) -> Vec<u8> {
    let mut p = width.to_be_bytes().to_vec();
    p.extend_from_slice(&height.to_be_bytes());
    full_box(b"ispe", 0, 0, &p)
}

fn ipma(item_id: u16, associations: &[u8]) -> Vec<u8> {
    let mut p = 1u32.to_be_bytes().to_vec();
    p.extend_from_slice(&item_id.to_be_bytes());
    p.push(u8::try_from(associations.len()).unwrap());
    p.extend_from_slice(associations);
    full_box(b"ipma", 0, 0, &p)
}

fn mdat(len: usize) -> Vec<u8> {
    make_box(b"mdat", &vec![0xAA; len])
}

/// pitm, iinf and iloc for one Exif item at 200+300.
fn minimal_meta() -> Vec<u8> {
    meta(&[pitm(1), iinf(&[infe(1, b"Exif")]), iloc(0, 4, &[Item::new(1, &[(200, 300)])])])
}

fn minimal_file() -> Vec<u8> {
    [ftyp(), minimal_meta(), mdat(600)].concat()
}

/// A file whose item 2 is an Exif block stored after 4 bytes of item 1 in 'mdat'.
fn exif_file(exif: &[u8]) -> Vec<u8> {
    let exif_len = u64::try_from(exif.len()).unwrap();
    let build_meta = |mdat_start: u64| {
        meta(&[
            hdlr(),
            pitm(1),
            iinf(&[infe(1, b"hvc1"), infe(2, b"Exif")]),
            iloc(0, 4, &[
                Item::new(1, &[(mdat_start, 4)]),
                Item::new(2, &[(mdat_start + 4, exif_len)]),
            ]),
            iref(&[reference(b"cdsc", 2, &[1])]),
        ])
    };
    // Field sizes are fixed, so the placeholder offset doesn't change the length
    let mdat_start = u64::try_from(ftyp().len() + build_meta(0).len() + 8).unwrap();
    let mut payload = vec![0x11; 4];
    payload.extend_from_slice(exif);
    [ftyp(), build_meta(mdat_start), make_box(b"mdat", &payload)].concat()
}

// ============================================================================
// Resolution
// ============================================================================

#[test]
fn parser_primary_item_byte_range() {
    init_logger();
    let file = minimal_file();
    let parser = HeifParser::from_bytes(&file).expect("parse failed");

    assert_eq!(parser.primary_item_id().unwrap(), 1);
    let entry = parser.find_entry(1).expect("no entry for item 1");
    assert!(entry.is_exif());
    let ranges = parser.resolve_byte_ranges(1).unwrap();
    assert_eq!(&ranges[..], &[ByteRange { offset: 200, length: 300 }]);

    let data = parser.item_data(1).unwrap();
    assert!(matches!(data, Cow::Borrowed(_)));
    assert_eq!(data.len(), 300);
    assert_eq!(data.as_ptr(), file[200..].as_ptr());
}

#[test]
fn parser_from_owned_and_reader() {
    let file = minimal_file();
    let owned = HeifParser::from_owned(file.clone()).unwrap();
    assert_eq!(owned.primary_item_id().unwrap(), 1);

    let mut cursor = std::io::Cursor::new(file);
    let from_reader = HeifParser::from_reader(&mut cursor).unwrap();
    assert_eq!(from_reader.resolve_byte_ranges(1).unwrap()[0], ByteRange { offset: 200, length: 300 });
}

#[test]
fn parser_unknown_item() {
    let file = minimal_file();
    let parser = HeifParser::from_bytes(&file).unwrap();
    assert!(parser.find_entry(9).is_none());
    assert!(matches!(parser.resolve_byte_ranges(9), Err(Error::ItemNotFound(9))));
}

#[test]
fn extent_absolute_offset_independent_of_field_size() {
    for field_size in [4, 8] {
        let item = Item { base_offset: 1000, ..Item::new(1, &[(50, 10)]) };
        let file = [ftyp(), meta(&[iloc(1, field_size, &[item])])].concat();
        let parser = HeifParser::from_bytes(&file).unwrap();

        let iloc = parser.item_locations().unwrap();
        assert_eq!(iloc.offset_size, field_size);
        let extent = iloc.find(1).unwrap().extents[0];
        assert_eq!(extent.absolute_offset(), Some(1050));

        // The file is far shorter than 1050 bytes
        match parser.resolve_byte_ranges(1) {
            Err(Error::OutOfBoundsOffset { offset, length, .. }) => {
                assert_eq!(offset, 1050);
                assert_eq!(length, 10);
            },
            other => panic!("unexpected {other:?}"),
        }
    }
}

#[test]
fn iinf_version_1_has_32_bit_entry_count() {
    let mut p = 2u32.to_be_bytes().to_vec();
    p.extend_from_slice(&[infe(1, b"hvc1"), infe(2, b"Exif")].concat());
    let file = [ftyp(), meta(&[full_box(b"iinf", 1, 0, &p)])].concat();
    let parser = HeifParser::from_bytes(&file).unwrap();
    let ids: Vec<u32> = parser.item_infos().map(|infe| infe.item_id).collect();
    assert_eq!(ids, [1, 2]);
    assert!(parser.find_entry(2).unwrap().is_exif());
}

#[test]
fn iloc_version_2_wide_item_ids() {
    let file = [
        ftyp(),
        meta(&[iloc(2, 4, &[Item::new(0x1_0001, &[(8, 4)])])]),
    ]
    .concat();
    let parser = HeifParser::from_bytes(&file).unwrap();
    let iloc = parser.item_locations().unwrap();
    assert_eq!(iloc.version, 2);
    assert_eq!(iloc.items.len(), 1);
    assert_eq!(iloc.items[0].item_id, 0x1_0001);
    assert_eq!(iloc.items[0].construction_method, ConstructionMethod::File);
    assert_eq!(&parser.item_data(0x1_0001).unwrap()[..], &file[8..12]);
}

#[test]
fn zero_length_extent_runs_to_end_of_file() {
    let file = [ftyp(), meta(&[iloc(0, 4, &[Item::new(1, &[(16, 0)])])])].concat();
    let parser = HeifParser::from_bytes(&file).unwrap();
    let len = u64::try_from(file.len()).unwrap();
    assert_eq!(parser.resolve_byte_ranges(1).unwrap()[0], ByteRange { offset: 16, length: len - 16 });
}

#[test]
fn multi_extent_item_data_is_concatenated() {
    let file = [ftyp(), meta(&[iloc(0, 4, &[Item::new(1, &[(0, 4), (8, 4)])])])].concat();
    let parser = HeifParser::from_bytes(&file).unwrap();
    let data = parser.item_data(1).unwrap();
    assert!(matches!(data, Cow::Owned(_)));
    assert_eq!(&data[..], b"\0\0\0\x18heic");
}

#[test]
fn external_data_reference_is_reported_per_item() {
    init_logger();
    let dref = full_box(b"dref", 0, 0, &[&1u32.to_be_bytes()[..], &full_box(b"url ", 0, 0, b"http://example.com/a.heic\0")[..]].concat());
    let external = Item { data_reference_index: 1, ..Item::new(1, &[(0, 10)]) };
    let file = [
        ftyp(),
        meta(&[make_box(b"dinf", &dref), iloc(0, 4, &[external, Item::new(2, &[(0, 8)])])]),
    ]
    .concat();
    let parser = HeifParser::from_bytes(&file).unwrap();

    assert!(matches!(parser.resolve_byte_ranges(1), Err(Error::UnsupportedExternalReference(1))));
    // The extents of the external item were still consumed
    assert_eq!(parser.resolve_byte_ranges(2).unwrap()[0], ByteRange { offset: 0, length: 8 });

    let entry = parser.data_entry(1).unwrap();
    assert!(!entry.is_self_contained());
    assert_eq!(&entry.location[..], b"http://example.com/a.heic");
    assert!(parser.data_entry(0).is_none());
    assert!(parser.data_entry(2).is_none());
}

#[test]
fn non_file_construction_method_is_reported() {
    let idat = Item { construction_method: 1, ..Item::new(1, &[(0, 4)]) };
    let file = [ftyp(), meta(&[iloc(1, 4, &[idat]), make_box(b"idat", b"abcd")])].concat();
    let parser = HeifParser::from_bytes(&file).unwrap();
    assert_eq!(parser.item_locations().unwrap().items[0].construction_method, ConstructionMethod::Idat);
    assert!(matches!(parser.resolve_byte_ranges(1), Err(Error::UnsupportedConstructionMethod(1))));
}

#[test]
fn construction_method_uses_all_12_bits() {
    init_logger();
    let wide = Item { construction_method: 0x0010, ..Item::new(1, &[(0, 4)]) };
    let unknown = Item { construction_method: 3, ..Item::new(2, &[(0, 4)]) };
    let file = [ftyp(), meta(&[iloc(1, 4, &[wide, unknown, Item::new(3, &[(0, 4)])])])].concat();
    let parser = HeifParser::from_bytes(&file).unwrap();

    let items = &parser.item_locations().unwrap().items;
    assert_eq!(items[0].construction_method, ConstructionMethod::Other(0x10));
    assert_eq!(items[1].construction_method, ConstructionMethod::Other(3));
    assert!(matches!(parser.resolve_byte_ranges(1), Err(Error::UnsupportedConstructionMethod(0x10))));
    assert!(matches!(parser.resolve_byte_ranges(2), Err(Error::UnsupportedConstructionMethod(3))));
    assert_eq!(parser.resolve_byte_ranges(3).unwrap()[0], ByteRange { offset: 0, length: 4 });
}

#[test]
fn self_contained_data_entry_ignores_trailing_bytes() {
    let url = full_box(b"url ", 0, 1, b"ignored\0");
    let dref = full_box(b"dref", 0, 0, &[&1u32.to_be_bytes()[..], &url[..]].concat());
    let file = [ftyp(), meta(&[make_box(b"dinf", &dref)])].concat();
    let parser = HeifParser::from_bytes(&file).unwrap();
    let entry = parser.data_entry(1).unwrap();
    assert!(entry.is_self_contained());
    assert!(entry.location.is_empty());
    assert_eq!(entry.entry_type, b"url ");
}

// ============================================================================
// Properties
// ============================================================================

fn properties_file() -> Vec<u8> {
    let ipco = make_box(b"ipco", &[
        ispe(640, 480),
        make_box(b"hvcC", &[1, 2, 3]),
        make_box(b"irot", &[1]),
    ]
    .concat());
    // essential ispe, index 0, hvcC, essential irot
    let iprp = make_box(b"iprp", &[ipco, ipma(1, &[0x81, 0x00, 0x02, 0x83])].concat());
    [ftyp(), meta(&[pitm(1), iinf(&[infe(1, b"hvc1")]), iprp])].concat()
}

#[test]
fn property_index_is_one_based() {
    let file = properties_file();
    let parser = HeifParser::from_bytes(&file).unwrap();
    let properties = parser.item_properties().unwrap();
    assert_eq!(properties.property_count(), 3);

    assert!(matches!(properties.property_by_index(0), Err(Error::InvalidPropertyIndex(0))));
    assert!(matches!(properties.property_by_index(4), Err(Error::InvalidPropertyIndex(4))));
    let first = properties.property_by_index(1).unwrap();
    assert_eq!(first.box_type(), b"ispe");
    assert!(matches!(parser.property_by_index(3).unwrap().body(), BoxBody::ImageRotation(r) if r.degrees() == 90));
}

#[test]
fn unknown_property_keeps_numbering() {
    init_logger();
    let file = properties_file();
    let parser = HeifParser::from_bytes(&file).unwrap();
    let list = parser.resolve_properties(1).unwrap();

    assert_eq!(list.len(), 3);
    assert_eq!(list[0].property_index, 1);
    assert!(list[0].essential);
    assert!(matches!(list[0].property.body(), BoxBody::ImageSpatialExtents(e) if e.width == 640 && e.height == 480));
    assert_eq!(list[1].property_index, 2);
    assert!(list[1].property.is_opaque());
    assert!(matches!(list[1].property.body(), BoxBody::Opaque(Some(raw)) if raw[..] == [1, 2, 3]));
    assert_eq!(list[2].property_index, 3);
    assert!(list[2].essential);

    assert!(parser.resolve_properties(2).unwrap().is_empty());
}

#[test]
fn properties_union_across_ipma_boxes() {
    let ipco = make_box(b"ipco", &[ispe(1, 1), make_box(b"irot", &[0]), make_box(b"imir", &[1])].concat());
    let iprp = make_box(b"iprp", &[ipco, ipma(1, &[0x01]), ipma(2, &[0x02]), ipma(1, &[0x03])].concat());
    let file = [ftyp(), meta(&[iprp])].concat();
    let parser = HeifParser::from_bytes(&file).unwrap();

    let indices: Vec<u16> = parser.resolve_properties(1).unwrap().iter().map(|p| p.property_index).collect();
    assert_eq!(indices, [1, 3]);
    assert_eq!(parser.item_properties().unwrap().association_boxes().count(), 3);
}

#[test]
fn colour_information_property() {
    let mut nclx = b"nclx".to_vec();
    nclx.extend_from_slice(&[0, 9, 0, 16, 0, 9, 0x00]);
    let ipco = make_box(b"ipco", &make_box(b"colr", &nclx));
    let iprp = make_box(b"iprp", &[ipco, ipma(1, &[0x01])].concat());
    let file = [ftyp(), meta(&[iprp])].concat();
    let parser = HeifParser::from_bytes(&file).unwrap();
    match parser.property_by_index(1).unwrap().body() {
        BoxBody::ColourInformation(ColourInformation::Nclx { colour_primaries, full_range, .. }) => {
            assert_eq!(*colour_primaries, 9);
            assert!(!full_range);
        },
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn association_past_end_of_ipco_is_skipped() {
    init_logger();
    let ipco = make_box(b"ipco", &ispe(8, 8));
    let iprp = make_box(b"iprp", &[ipco, ipma(1, &[0x81, 0x05])].concat());
    let file = [ftyp(), meta(&[iprp])].concat();
    let parser = HeifParser::from_bytes(&file).unwrap();

    let list = parser.resolve_properties(1).unwrap();
    assert_eq!(list.len(), 1);
    assert_eq!(list[0].property_index, 1);
    assert!(matches!(parser.property_by_index(5), Err(Error::InvalidPropertyIndex(5))));
}

#[test]
fn invalid_properties_are_kept_as_opaque() {
    init_logger();
    let ipco = make_box(b"ipco", &[
        ispe(0, 0),
        full_box(b"pixi", 1, 0, &[1, 8]),
        full_box(b"auxC", 1, 0, b"urn:x\0"),
        make_box(b"colr", b"rICC"),
        make_box(b"irot", &[0xff]),
    ]
    .concat());
    let iprp = make_box(b"iprp", &[ipco, ipma(1, &[0x01, 0x02, 0x03, 0x04, 0x05])].concat());
    let file = [ftyp(), meta(&[iinf(&[infe(1, b"Exif")]), iloc(0, 4, &[Item::new(1, &[(0, 8)])]), iprp])].concat();
    let parser = HeifParser::from_bytes(&file).unwrap();

    let list = parser.resolve_properties(1).unwrap();
    assert_eq!(list.len(), 5);
    assert!(list.iter().all(|p| matches!(p.property.body(), BoxBody::Opaque(None))));
    assert_eq!(list[1].property.box_type(), b"pixi");
    assert_eq!(parser.resolve_byte_ranges(1).unwrap()[0], ByteRange { offset: 0, length: 8 });
}

#[test]
fn truncated_property_is_fatal() {
    let ipco = make_box(b"ipco", &full_box(b"ispe", 0, 0, &[0, 0, 0, 1]));
    let file = [ftyp(), meta(&[make_box(b"iprp", &ipco)])].concat();
    assert!(matches!(HeifParser::from_bytes(&file), Err(Error::StructuralSizeMismatch(_))));
}

#[test]
fn iprp_without_leading_ipco_is_fatal() {
    let iprp = make_box(b"iprp", &ipma(1, &[0x01]));
    let file = [ftyp(), meta(&[iprp])].concat();
    assert!(matches!(HeifParser::from_bytes(&file), Err(Error::MandatoryBoxMissing("ipco"))));
}

// ============================================================================
// References
// ============================================================================

#[test]
fn thumbnail_reference_query() {
    let file = [
        ftyp(),
        meta(&[
            pitm(1),
            iinf(&[infe(1, b"hvc1"), infe(5, b"hvc1")]),
            iref(&[reference(b"thmb", 5, &[1]), reference(b"dimg", 1, &[2, 3, 4])]),
        ]),
    ]
    .concat();
    let parser = HeifParser::from_bytes(&file).unwrap();

    assert_eq!(&parser.resolve_references_to(1, b"thmb").unwrap()[..], &[5]);
    assert!(parser.resolve_references_to(5, b"thmb").unwrap().is_empty());
    assert_eq!(&parser.resolve_references_from(5, b"thmb").unwrap()[..], &[1]);
    assert_eq!(&parser.resolve_references_from(1, b"dimg").unwrap()[..], &[2, 3, 4]);
    assert_eq!(parser.item_references().unwrap().edges().count(), 2);
}

#[test]
fn iref_version_1_uses_wide_ids() {
    let mut p = 0x1_0005u32.to_be_bytes().to_vec();
    p.extend_from_slice(&1u16.to_be_bytes());
    p.extend_from_slice(&0x1_0001u32.to_be_bytes());
    let file = [ftyp(), meta(&[full_box(b"iref", 1, 0, &make_box(b"thmb", &p))])].concat();
    let parser = HeifParser::from_bytes(&file).unwrap();
    assert_eq!(&parser.resolve_references_to(0x1_0001, b"thmb").unwrap()[..], &[0x1_0005]);
}

#[test]
fn references_without_iref() {
    let file = minimal_file();
    let parser = HeifParser::from_bytes(&file).unwrap();
    assert!(parser.item_references().is_none());
    assert!(parser.resolve_references_to(1, b"thmb").unwrap().is_empty());
}

// ============================================================================
// EXIF
// ============================================================================

#[test]
fn exif_data_skips_tiff_header_offset() {
    init_logger();
    let mut exif = 6u32.to_be_bytes().to_vec();
    exif.extend_from_slice(b"Exif\0\0MM\0*\0\0\0\x08");
    let file = exif_file(&exif);
    let parser = HeifParser::from_bytes(&file).unwrap();

    assert_eq!(parser.handler().unwrap().handler_type, b"pict");
    assert!(parser.file_type().unwrap().is_heif());
    assert_eq!(parser.exif_item_id(), Some(2));
    assert_eq!(&parser.item_data(2).unwrap()[..], &exif[..]);
    assert_eq!(&parser.exif_data().unwrap()[..], b"MM\0*\0\0\0\x08");
}

#[test]
fn exif_offset_past_end_is_invalid() {
    let mut exif = 100u32.to_be_bytes().to_vec();
    exif.extend_from_slice(b"II*\0");
    let file = exif_file(&exif);
    let parser = HeifParser::from_bytes(&file).unwrap();
    assert!(matches!(parser.exif_data(), Err(Error::InvalidData(_))));
}

#[test]
fn no_exif_item() {
    let file = properties_file();
    let parser = HeifParser::from_bytes(&file).unwrap();
    assert_eq!(parser.exif_item_id(), None);
    assert!(parser.exif_data().is_err());
}

// ============================================================================
// Structure
// ============================================================================

#[test]
fn truncated_pitm_is_fatal() {
    init_logger();
    // Declared size 10 can't hold the 4-byte full box header
    let file = [ftyp(), meta(&[make_box(b"pitm", &[0, 0])])].concat();
    assert!(matches!(HeifParser::from_bytes(&file), Err(Error::StructuralSizeMismatch(_))));
}

#[test]
fn child_overrunning_parent_is_fatal() {
    let mut infe = infe(1, b"Exif");
    // Claim 4 more bytes than 'iinf' has
    infe[3] += 4;
    let file = [ftyp(), meta(&[iinf(&[infe])]), mdat(16)].concat();
    assert!(matches!(HeifParser::from_bytes(&file), Err(Error::StructuralSizeMismatch(_))));
}

#[test]
fn container_with_stray_bytes_is_fatal() {
    let ipco = make_box(b"ipco", &[ispe(1, 1), vec![0, 0, 0, 0]].concat());
    let file = [ftyp(), meta(&[make_box(b"iprp", &ipco)])].concat();
    assert!(matches!(HeifParser::from_bytes(&file), Err(Error::StructuralSizeMismatch(_))));
}

#[test]
fn leaf_with_trailing_bytes() {
    let mut pitm = pitm(1);
    pitm[3] += 2;
    pitm.extend_from_slice(&[0, 0]);
    let file = [ftyp(), meta(&[pitm])].concat();
    assert!(matches!(HeifParser::from_bytes(&file), Err(Error::StructuralSizeMismatch(_))));

    let lenient = ParseConfig::default().lenient(true);
    let parser = HeifParser::from_bytes_with_config(&file, &lenient).unwrap();
    assert_eq!(parser.primary_item_id().unwrap(), 1);
}

#[test]
fn meta_padding_is_skipped() {
    let mut meta = meta(&[pitm(1)]);
    meta[3] += 4;
    meta.extend_from_slice(&[0, 0, 0, 0]);
    let file = [ftyp(), meta].concat();
    let parser = HeifParser::from_bytes(&file).unwrap();
    assert_eq!(parser.primary_item_id().unwrap(), 1);
    let meta = parser.tree().node(parser.meta());
    // version and flags, a 14-byte 'pitm', padding
    assert_eq!(meta.payload_len(), 4 + 14 + 4);
    assert_eq!(meta.children().len(), 1);
}

#[test]
fn tree_children_tile_their_parent() {
    let file = exif_file(b"\0\0\0\0MM");
    let parser = HeifParser::from_bytes(&file).unwrap();
    let tree = parser.tree();
    for (id, node) in tree.iter() {
        let mut end = node.end();
        for (child_id, child) in tree.children(id).collect::<Vec<_>>().into_iter().rev() {
            assert_eq!(child.parent(), Some(id));
            assert_eq!(child.end(), end, "child {child_id:?} doesn't end where the next begins");
            end = child.header().start();
        }
    }
    let top_level_end = tree.roots().last().map(|id| tree.node(id).end());
    assert_eq!(top_level_end, Some(u64::try_from(file.len()).unwrap()));
}

#[test]
fn size_zero_box_extends_to_end_of_file() {
    let mut file = [ftyp(), minimal_meta()].concat();
    file.extend_from_slice(&[0, 0, 0, 0]);
    file.extend_from_slice(b"mdat");
    file.extend_from_slice(&[0xAA; 600]);
    let parser = HeifParser::from_bytes(&file).unwrap();
    let tree = parser.tree();
    let mdat = tree.roots().last().map(|id| tree.node(id)).unwrap();
    assert!(mdat.header().extends_to_end());
    assert_eq!(mdat.header().size(), BoxSize::ToEnd);
    assert!(mdat.header().payload_size().is_err());
    assert_eq!(mdat.payload_len(), 600);
    assert_eq!(parser.resolve_byte_ranges(1).unwrap()[0], ByteRange { offset: 200, length: 300 });
}

#[test]
fn large_size_and_uuid_boxes() {
    let mut large = 1u32.to_be_bytes().to_vec();
    large.extend_from_slice(b"free");
    large.extend_from_slice(&20u64.to_be_bytes());
    large.extend_from_slice(&[0; 4]);

    let mut uuid = [0x0f; 16].to_vec();
    uuid.extend_from_slice(b"payload");
    let file = [ftyp(), meta(&[pitm(1)]), large, make_box(b"uuid", &uuid)].concat();
    let parser = HeifParser::from_bytes(&file).unwrap();
    let tree = parser.tree();
    let roots: Vec<_> = tree.roots().map(|id| tree.node(id)).collect();
    assert_eq!(roots.len(), 4);

    assert_eq!(roots[2].header().size(), BoxSize::Declared(20));
    assert_eq!(roots[2].header().header_len(), 16);
    assert_eq!(roots[2].payload_len(), 4);

    assert_eq!(roots[3].box_type(), b"uuid");
    assert_eq!(roots[3].header().extended_type().unwrap().to_string(), "0f".repeat(16));
    assert!(matches!(roots[3].body(), BoxBody::Opaque(Some(raw)) if &raw[..] == b"payload"));
}

#[test]
fn meta_is_mandatory_and_unique() {
    let file = [ftyp(), mdat(4)].concat();
    assert!(matches!(HeifParser::from_bytes(&file), Err(Error::MandatoryBoxMissing("meta"))));

    let file = [ftyp(), meta(&[]), meta(&[])].concat();
    assert!(matches!(HeifParser::from_bytes(&file), Err(Error::InvalidData(_))));
}

#[test]
fn missing_optional_boxes_fail_queries_only() {
    let file = [ftyp(), meta(&[])].concat();
    let parser = HeifParser::from_bytes(&file).unwrap();
    assert!(matches!(parser.primary_item_id(), Err(Error::MandatoryBoxMissing("pitm"))));
    assert!(matches!(parser.item_locations(), Err(Error::MandatoryBoxMissing("iloc"))));
    assert!(matches!(parser.item_properties(), Err(Error::MandatoryBoxMissing("iprp"))));
    assert_eq!(parser.item_infos().count(), 0);
}

#[test]
fn ftyp_must_come_first() {
    let file = [meta(&[pitm(1)]), ftyp()].concat();
    assert!(matches!(HeifParser::from_bytes(&file), Err(Error::InvalidData(_))));

    let lenient = ParseConfig::default().lenient(true);
    let parser = HeifParser::from_bytes_with_config(&file, &lenient).unwrap();
    assert_eq!(parser.primary_item_id().unwrap(), 1);
}

#[test]
fn duplicate_item_ids_are_rejected() {
    let file = [ftyp(), meta(&[iinf(&[infe(3, b"Exif"), infe(3, b"hvc1")])])].concat();
    assert!(matches!(HeifParser::from_bytes(&file), Err(Error::InvalidData(_))));
}

#[test]
fn invalid_iloc_size_selector() {
    let mut iloc = iloc(0, 4, &[]);
    // offset_size 3
    iloc[12] = 0x34;
    let file = [ftyp(), meta(&[iloc])].concat();
    assert!(matches!(HeifParser::from_bytes(&file), Err(Error::InvalidSizeSelector(3))));
}

// ============================================================================
// Resource limits
// ============================================================================

#[test]
fn resource_limit_items() {
    let file = [ftyp(), meta(&[iinf(&[infe(1, b"Exif"), infe(2, b"hvc1")])])].concat();
    let config = ParseConfig::default().with_max_items(1);
    assert!(matches!(
        HeifParser::from_bytes_with_config(&file, &config),
        Err(Error::ResourceLimitExceeded(_))
    ));
    assert!(HeifParser::from_bytes_with_config(&file, &ParseConfig::unlimited()).is_ok());
}

#[test]
fn resource_limit_box_depth() {
    let file = minimal_file();
    // meta > iinf > infe is depth 2
    let config = ParseConfig::default().with_max_box_depth(1);
    assert!(matches!(
        HeifParser::from_bytes_with_config(&file, &config),
        Err(Error::ResourceLimitExceeded(_))
    ));
    let config = ParseConfig::default().with_max_box_depth(2);
    assert!(HeifParser::from_bytes_with_config(&file, &config).is_ok());
}

#[test]
fn deep_nesting_is_capped_without_limits() {
    const LEVELS: usize = 10_000;
    let mut nested = Vec::with_capacity(8 * LEVELS);
    for level in 0..LEVELS {
        nested.extend_from_slice(&u32::try_from(8 * (LEVELS - level)).unwrap().to_be_bytes());
        nested.extend_from_slice(b"dinf");
    }
    let file = [ftyp(), meta(&[nested])].concat();
    assert!(matches!(
        HeifParser::from_bytes_with_config(&file, &ParseConfig::unlimited()),
        Err(Error::ResourceLimitExceeded(_))
    ));

    // meta at depth 0 holds dinf boxes at depths 1 to MAX_BOX_DEPTH
    let levels = usize::try_from(MAX_BOX_DEPTH).unwrap();
    let mut nested = Vec::new();
    for level in 0..levels {
        nested.extend_from_slice(&u32::try_from(8 * (levels - level)).unwrap().to_be_bytes());
        nested.extend_from_slice(b"dinf");
    }
    let file = [ftyp(), meta(&[nested])].concat();
    let parser = HeifParser::from_bytes_with_config(&file, &ParseConfig::unlimited()).unwrap();
    let deepest = parser.tree().iter().map(|(id, _)| parser.tree().depth(id)).max().unwrap();
    assert_eq!(deepest, levels);
}

#[test]
fn resource_limit_extents_and_properties() {
    let file = [ftyp(), meta(&[iloc(0, 4, &[Item::new(1, &[(0, 1), (1, 1)])])])].concat();
    let config = ParseConfig::default().with_max_extents_per_item(1);
    assert!(matches!(
        HeifParser::from_bytes_with_config(&file, &config),
        Err(Error::ResourceLimitExceeded(_))
    ));

    let file = properties_file();
    let config = ParseConfig::default().with_max_properties(2);
    assert!(matches!(
        HeifParser::from_bytes_with_config(&file, &config),
        Err(Error::ResourceLimitExceeded(_))
    ));
}

#[test]
fn opaque_payload_retention_limit() {
    let file = minimal_file();
    let config = ParseConfig::default().with_opaque_retain_limit(16);
    let parser = HeifParser::from_bytes_with_config(&file, &config).unwrap();
    let tree = parser.tree();
    let mdat = tree.roots().last().map(|id| tree.node(id)).unwrap();
    assert!(matches!(mdat.body(), BoxBody::Opaque(None)));
    assert_eq!(mdat.payload_len(), 600);
}
