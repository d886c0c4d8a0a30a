#![no_main]
use heif_meta_parse::{HeifParser, ParseConfig};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let config = ParseConfig::default()
        .with_max_items(64)
        .with_max_extents_per_item(16)
        .with_max_properties(64)
        .with_max_box_depth(8)
        .with_max_boxes(1_000)
        .lenient(true);
    if let Ok(parser) = HeifParser::from_bytes_with_config(data, &config) {
        for infe in parser.item_infos() {
            let _ = parser.resolve_byte_ranges(infe.item_id);
        }
    }
});
