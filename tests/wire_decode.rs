mod common;

use bucketsync::{
    core::bucket::ContentFormat,
    record::{Record, Value},
    wire::{
        error::FormatError,
        reader::WireReader,
        schema::{FieldType, MAX_DEFINITION_DEPTH, SCHEMA_MAGIC, SCHEMA_TRAILER, SCHEMA_VERSION, decode_schema},
        structures::{ROTATION_SCALE, STRUCTURES_MAGIC, decode_structures},
    },
};

use common::{Bytes, SchemaPage, StructureRow, def, field, structures_page, structures_page_with, write_definition};

fn object(pairs: &[(&str, Value)]) -> Record {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

fn dino_definition() -> bucketsync::wire::schema::StructDefinition {
    def(vec![
        field("dino_id", FieldType::Str),
        field("classname", FieldType::NameRef),
        field("tamed", FieldType::Bool),
        field("level", FieldType::Int),
        field("health", FieldType::Float),
        field("born_at", FieldType::Timestamp),
        field("weight", FieldType::Double),
        field("colors", FieldType::UShort),
        field(
            "location",
            FieldType::Object(def(vec![field("x", FieldType::Float), field("y", FieldType::Float)])),
        ),
        field(
            "stats",
            FieldType::ObjectArray(def(vec![
                field("name", FieldType::NameRef),
                field("points", FieldType::Int),
            ])),
        ),
        field("flags", FieldType::BoolArray),
        field("mutations", FieldType::IntArray),
        field("scales", FieldType::FloatArray),
        field("tags", FieldType::StrArray),
    ])
}

fn rex() -> Record {
    let mut r = Record::new();
    r.insert("dino_id", "rex-1");
    r.insert("classname", "Rex_Character_BP_C");
    r.insert("tamed", true);
    r.insert("level", 150);
    r.insert("health", 1250.5f32);
    r.insert("born_at", 1_600_000_000);
    r.insert("weight", 0.25f32);
    r.insert("colors", 513u16);
    r.insert("location", object(&[("x", Value::Float(10.0)), ("y", Value::Float(-4.5))]));
    r.insert(
        "stats",
        Value::Array(vec![
            Value::Object(object(&[
                ("name", Value::Str("health".into())),
                ("points", Value::Int(30)),
            ])),
            Value::Null,
            Value::Object(object(&[("name", Value::Null), ("points", Value::Int(2))])),
        ]),
    );
    r.insert("flags", Value::Array(vec![Value::Bool(true), Value::Bool(false)]));
    r.insert("mutations", Value::Array(vec![Value::Null, Value::Null, Value::Null]));
    r.insert("scales", Value::Array(vec![]));
    r.insert(
        "tags",
        Value::Array(vec![Value::Str("alpha".into()), Value::Null, Value::Str("".into())]),
    );
    r
}

fn null_heavy() -> Record {
    let mut r = Record::new();
    r.insert("dino_id", "ghost");
    r.insert("tamed", false);
    for name in [
        "classname", "level", "health", "born_at", "weight", "colors", "location", "stats", "flags", "mutations",
        "scales", "tags",
    ] {
        r.insert(name, Value::Null);
    }
    r
}

#[test]
fn schema_page_roundtrips_every_field_kind() {
    let page = SchemaPage::new(dino_definition())
        .names(&["Rex_Character_BP_C", "health"])
        .record(rex())
        .record(null_heavy());

    let doc = decode_schema(&page.encode()).expect("decode");

    assert_eq!(doc.name_table, vec!["Rex_Character_BP_C", "health"]);
    assert_eq!(doc.definition, dino_definition());
    assert_eq!(doc.records.len(), 2);
    assert_eq!(doc.records[0], rex());
    assert_eq!(doc.records[1], null_heavy());
}

#[test]
fn all_null_array_reads_no_element_bytes() {
    let page = SchemaPage::new(def(vec![
        field("mutations", FieldType::IntArray),
        field("after", FieldType::Int),
    ]))
    .record(object(&[
        ("mutations", Value::Array(vec![Value::Null; 4])),
        ("after", Value::Int(99)),
    ]));

    let doc = decode_schema(&page.encode()).expect("decode");
    assert_eq!(
        doc.records[0].get("mutations"),
        Some(&Value::Array(vec![Value::Null; 4]))
    );
    assert_eq!(doc.records[0].get("after"), Some(&Value::Int(99)));
}

#[test]
fn wide_lengths_are_selected_by_flag_bits() {
    let long = "x".repeat(300);
    let many: Vec<Value> = (0..300).map(Value::Int).collect();
    let page = SchemaPage::new(def(vec![
        field("note", FieldType::Str),
        field("ids", FieldType::IntArray),
        field("lines", FieldType::StrArray),
    ]))
    .record(object(&[
        ("note", Value::Str(long.clone())),
        ("ids", Value::Array(many.clone())),
        ("lines", Value::Array(vec![Value::Str(long.clone()), Value::Str("short".into())])),
    ]));

    let doc = decode_schema(&page.encode()).expect("decode");
    let rec = &doc.records[0];
    assert_eq!(rec.get("note").and_then(Value::as_str), Some(long.as_str()));
    assert_eq!(rec.get("ids"), Some(&Value::Array(many)));
    assert_eq!(
        rec.get("lines"),
        Some(&Value::Array(vec![Value::Str(long), Value::Str("short".into())]))
    );
}

#[test]
fn custom_data_keeps_four_byte_entries_and_skips_others() {
    let page = SchemaPage::new(def(vec![field("id", FieldType::Int)]))
        .custom(1, &77i32.to_le_bytes())
        .custom(2, &[1, 2, 3])
        .custom(3, &(-5i32).to_le_bytes())
        .record(object(&[("id", Value::Int(1))]));

    let doc = decode_schema(&page.encode()).expect("decode");
    assert_eq!(doc.custom_data.len(), 2);
    assert_eq!(doc.custom_data.get(&1), Some(&77));
    assert_eq!(doc.custom_data.get(&3), Some(&-5));
    assert_eq!(doc.records.len(), 1);
}

#[test]
fn wrong_magic_is_rejected() {
    let page = SchemaPage::new(def(vec![field("id", FieldType::Int)]));
    let err = decode_schema(&page.encode_with(0xDEAD_BEEF, SCHEMA_VERSION, SCHEMA_TRAILER)).unwrap_err();
    assert_eq!(
        err,
        FormatError::BadMagic {
            expected: SCHEMA_MAGIC,
            found: 0xDEAD_BEEF
        }
    );
}

#[test]
fn unsupported_version_is_rejected() {
    let page = SchemaPage::new(def(vec![field("id", FieldType::Int)]));
    let err = decode_schema(&page.encode_with(SCHEMA_MAGIC, 2, SCHEMA_TRAILER)).unwrap_err();
    assert!(matches!(err, FormatError::UnsupportedVersion { expected: 1, found: 2 }));
}

#[test]
fn trailer_mismatch_names_the_bad_word() {
    let mut trailer = SCHEMA_TRAILER;
    trailer[3] = 0;
    let page = SchemaPage::new(def(vec![field("id", FieldType::Int)])).record(object(&[("id", Value::Int(5))]));
    let err = decode_schema(&page.encode_with(SCHEMA_MAGIC, SCHEMA_VERSION, trailer)).unwrap_err();
    assert_eq!(
        err,
        FormatError::TrailerMismatch {
            index: 3,
            expected: SCHEMA_TRAILER[3],
            found: 0
        }
    );
}

#[test]
fn unknown_type_tag_is_rejected() {
    let mut out = Bytes::default();
    out.u32(SCHEMA_MAGIC).u32(0).u32(SCHEMA_VERSION).u32(0).u8(0);
    out.u8(1).u8(14).short_str("mystery");

    let err = decode_schema(&out.0).unwrap_err();
    assert_eq!(
        err,
        FormatError::UnknownFieldType {
            tag: 14,
            field: "mystery".to_string()
        }
    );
}

#[test]
fn truncated_buffer_is_rejected_at_every_cut() {
    let bytes = SchemaPage::new(dino_definition())
        .names(&["Rex_Character_BP_C", "health"])
        .record(rex())
        .encode();

    for cut in [0, 3, 16, 40, bytes.len() / 2, bytes.len() - 1] {
        let err = decode_schema(&bytes[..cut]).unwrap_err();
        assert!(matches!(err, FormatError::Truncated { .. }), "cut {cut}: {err:?}");
    }
}

#[test]
fn records_announced_for_an_empty_definition_are_rejected() {
    let mut out = Bytes::default();
    out.u32(SCHEMA_MAGIC).u32(0).u32(SCHEMA_VERSION).u32(5_000_000).u8(0);
    write_definition(&mut out, &def(Vec::new()));
    for word in SCHEMA_TRAILER {
        out.u32(word);
    }

    let err = decode_schema(&out.0).unwrap_err();
    assert_eq!(err, FormatError::EmptyDefinition { count: 5_000_000 });
}

#[test]
fn empty_definition_without_records_still_decodes() {
    let mut out = Bytes::default();
    out.u32(SCHEMA_MAGIC).u32(0).u32(SCHEMA_VERSION).u32(0).u8(0);
    write_definition(&mut out, &def(Vec::new()));
    for word in SCHEMA_TRAILER {
        out.u32(word);
    }

    let doc = decode_schema(&out.0).expect("decode");
    assert!(doc.records.is_empty());
    assert!(doc.definition.fields.is_empty());
}

#[test]
fn element_count_beyond_the_buffer_fails_before_decoding() {
    let mut out = Bytes::default();
    out.u32(SCHEMA_MAGIC).u32(0).u32(SCHEMA_VERSION).u32(u32::MAX).u8(0);
    write_definition(
        &mut out,
        &def(vec![field("id", FieldType::Int), field("alive", FieldType::Bool)]),
    );
    let header_len = out.0.len();
    out.u8(0).i32(1).u8(1);
    for word in SCHEMA_TRAILER {
        out.u32(word);
    }

    let err = decode_schema(&out.0).unwrap_err();
    let FormatError::Truncated { offset, wanted, len } = err else {
        panic!("expected truncation, got {err:?}");
    };
    assert_eq!(offset, header_len);
    assert_eq!(len, out.0.len());
    assert!(wanted > len);
}

#[test]
fn name_reference_out_of_range_is_rejected() {
    let mut out = Bytes::default();
    out.u32(SCHEMA_MAGIC).u32(1).u32(SCHEMA_VERSION).u32(1).u8(0);
    out.long_str("only");
    write_definition(&mut out, &def(vec![field("classname", FieldType::NameRef)]));
    out.u8(0).u16(5);
    for word in SCHEMA_TRAILER {
        out.u32(word);
    }

    let err = decode_schema(&out.0).unwrap_err();
    assert_eq!(err, FormatError::NameIndexOutOfRange { index: 5, len: 1 });
}

#[test]
fn definition_nesting_is_capped() {
    let mut out = Bytes::default();
    out.u32(SCHEMA_MAGIC).u32(0).u32(SCHEMA_VERSION).u32(0).u8(0);
    for _ in 0..=MAX_DEFINITION_DEPTH {
        out.u8(1).u8(1).short_str("inner");
    }

    let err = decode_schema(&out.0).unwrap_err();
    assert_eq!(
        err,
        FormatError::NestingTooDeep {
            depth: MAX_DEFINITION_DEPTH
        }
    );
}

#[test]
fn structures_page_resolves_tables_and_scales_yaw() {
    let mut wall = StructureRow::new(1001);
    wall.name_index = 1;
    wall.has_inventory = true;
    wall.yaw_byte = 64;
    wall.commit_index = 1;
    wall.commit_type = 1;
    wall.tribe_id = 42;
    wall.x = 1.5;
    wall.y = -2.0;
    wall.z = 300.25;

    let bytes = structures_page(&["Foundation_C", "Wall_C"], &["c-old", "c-new"], &[StructureRow::new(1000), wall]);
    let doc = decode_structures(&bytes).expect("decode");

    assert_eq!(doc.name_table, vec!["Foundation_C", "Wall_C"]);
    assert_eq!(doc.commit_table, vec!["c-old", "c-new"]);
    assert_eq!(doc.records.len(), 2);

    let first = &doc.records[0];
    assert_eq!(first.classname, "Foundation_C");
    assert!(!first.has_inventory);
    assert_eq!(first.commit_id, "c-old");

    let second = &doc.records[1];
    assert_eq!(second.classname, "Wall_C");
    assert!(second.has_inventory);
    assert_eq!(second.commit_id, "c-new");
    assert_eq!(second.commit_type, 1);
    assert_eq!(second.structure_id, 1001);
    assert_eq!(second.tribe_id, 42);
    assert_eq!(second.location.x, 1.5);
    assert_eq!(second.location.y, -2.0);
    assert_eq!(second.location.z, 300.25);
    assert_eq!(second.location.yaw, 64.0 * ROTATION_SCALE);
    assert_eq!(second.location.pitch, 0.0);
    assert_eq!(second.location.roll, 0.0);
}

#[test]
fn structure_converts_to_generic_record() {
    let bytes = structures_page(&["Wall_C"], &["c1"], &[StructureRow::new(9)]);
    let rec = decode_structures(&bytes).expect("decode").records[0].clone().into_record();

    assert_eq!(rec.get("structure_id"), Some(&Value::Int(9)));
    assert_eq!(rec.get("classname").and_then(Value::as_str), Some("Wall_C"));
    assert_eq!(rec.get("commit_id").and_then(Value::as_str), Some("c1"));
    assert_eq!(rec.get("commit_type"), Some(&Value::Int(1)));
    let location = rec.get("location").and_then(Value::as_object).expect("location");
    assert_eq!(location.len(), 6);
}

#[test]
fn structures_reject_wrong_version_and_bad_commit_index() {
    let err = decode_structures(&structures_page_with(STRUCTURES_MAGIC, 1, &[], &[], &[])).unwrap_err();
    assert!(matches!(err, FormatError::UnsupportedVersion { expected: 2, found: 1 }));

    let mut row = StructureRow::new(1);
    row.commit_index = 3;
    let err = decode_structures(&structures_page(&["A"], &["c1"], &[row])).unwrap_err();
    assert_eq!(err, FormatError::CommitIndexOutOfRange { index: 3, len: 1 });

    let err = decode_structures(&structures_page_with(7, 2, &[], &[], &[])).unwrap_err();
    assert!(matches!(err, FormatError::BadMagic { found: 7, .. }));
}

#[test]
fn content_format_dispatches_to_the_matching_decoder() {
    let schema = SchemaPage::new(def(vec![field("dino_id", FieldType::Str)]))
        .record(object(&[("dino_id", Value::Str("a".into()))]))
        .record(object(&[("dino_id", Value::Str("b".into()))]))
        .encode();
    let records = ContentFormat::Schema.decode(&schema).expect("schema");
    assert_eq!(records.len(), 2);

    let structures = structures_page(&["Wall_C"], &["c1"], &[StructureRow::new(3)]);
    let records = ContentFormat::Structures.decode(&structures).expect("structures");
    assert_eq!(records[0].get("structure_id"), Some(&Value::Int(3)));

    assert!(ContentFormat::Structures.decode(&schema).is_err());
    assert_eq!(ContentFormat::Schema.tag(), "dwf_v1");
    assert_eq!(ContentFormat::Structures.tag(), "structures_bin");
}

#[test]
fn reader_reads_little_endian_and_strings() {
    let mut out = Bytes::default();
    out.u8(0xFF)
        .u16(0xBEEF)
        .i32(-2)
        .f32(0.5)
        .short_str("abc")
        .long_str("de")
        .cstr("fgh")
        .raw(&[0xE9]);

    let mut r = WireReader::new(&out.0);
    assert_eq!(r.read_i8().expect("i8"), -1);
    assert_eq!(r.read_u16().expect("u16"), 0xBEEF);
    assert_eq!(r.read_i32().expect("i32"), -2);
    assert_eq!(r.read_f32().expect("f32"), 0.5);
    assert_eq!(r.read_short_string().expect("short"), "abc");
    assert_eq!(r.read_long_string().expect("long"), "de");
    assert_eq!(r.read_null_terminated_string().expect("cstr"), "fgh");
    assert_eq!(r.read_fixed_string(1).expect("latin1"), "\u{e9}");
    assert_eq!(r.remaining(), 0);
    assert!(matches!(r.read_u8(), Err(FormatError::Truncated { offset, wanted: 1, .. }) if offset == out.0.len()));
}

#[test]
fn reader_flag_bits_and_unterminated_string() {
    assert!(WireReader::flag(0b1000_0001, 7));
    assert!(WireReader::flag(0b1000_0001, 0));
    assert!(!WireReader::flag(0b1000_0001, 1));

    let mut r = WireReader::new(b"no terminator");
    assert!(matches!(
        r.read_null_terminated_string(),
        Err(FormatError::Truncated { .. })
    ));
    assert_eq!(r.position(), 0);
}
