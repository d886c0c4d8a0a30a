#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(parser) = heif_meta_parse::HeifParser::from_bytes(data) else {
        return;
    };
    if let Ok(primary) = parser.primary_item_id() {
        let _ = parser.item_data(primary);
        let _ = parser.resolve_properties(primary);
        let _ = parser.resolve_references_to(primary, b"thmb");
    }
    let _ = parser.exif_data();
});
