mod common;

use common::{DeltaBuilder, PackEntrySpec, build_pack, scratch_repo};
use packrat::{NoBases, ObjectId, ObjectStore, ObjectType, Pack, PackIndex};
use pretty_assertions::assert_eq;
use std::path::PathBuf;

const BASE: &[u8] = b"The quick brown fox\n";
const TARGET: &[u8] = b"The slow brown fox\n";

fn fox_delta() -> Vec<u8> {
    DeltaBuilder::new(BASE.len(), TARGET.len())
        .copy(0, 4)
        .insert(b"slow")
        .copy(9, 11)
        .build()
}

/// Write `.pack` and `.idx` files for the given entries and ids.
fn install_pack(
    pack_dir: &std::path::Path,
    pack_bytes: &[u8],
    entries: Vec<(ObjectId, u32, u64)>,
) -> PathBuf {
    let trailer = ObjectId::from_raw_slice(&pack_bytes[pack_bytes.len() - 20..]).unwrap();
    std::fs::create_dir_all(pack_dir).unwrap();

    let pack_path = pack_dir.join(format!("pack-{}.pack", trailer.to_hex()));
    std::fs::write(&pack_path, pack_bytes).unwrap();
    std::fs::write(
        pack_path.with_extension("idx"),
        PackIndex::write_v2(entries, &trailer),
    )
    .unwrap();
    pack_path
}

#[test]
fn full_objects_read_back_from_a_pack() -> anyhow::Result<()> {
    let dir = assert_fs::TempDir::new()?;
    let payloads: [&[u8]; 3] = [b"one\n", b"two\n", b"three\n"];

    let specs: Vec<PackEntrySpec> = payloads
        .iter()
        .map(|p| PackEntrySpec::Full(ObjectType::Blob, p.to_vec()))
        .collect();
    let (pack_bytes, offsets) = build_pack(&specs);

    let entries: Vec<(ObjectId, u32, u64)> = payloads
        .iter()
        .zip(&offsets)
        .map(|(payload, &offset)| (ObjectId::for_object(ObjectType::Blob, payload), 0, offset))
        .collect();
    let pack_path = install_pack(dir.path(), &pack_bytes, entries.clone());

    let pack = Pack::open(&pack_path)?;
    assert_eq!(pack.object_count(), 3);
    for (id, _, _) in &entries {
        let raw = pack.read(id, &NoBases)?.expect("object in pack");
        assert_eq!(raw.id(), *id);
    }
    pack.verify(&NoBases)?;
    Ok(())
}

#[test]
fn index_lookup_brackets_with_fanout() -> anyhow::Result<()> {
    let id = |first: u8, fill: u8| {
        let mut raw = [fill; 20];
        raw[0] = first;
        ObjectId::from_raw(raw)
    };
    let entries = vec![
        (id(0x00, 0xaa), 0, 12),
        (id(0x7f, 0x11), 0, 40),
        (id(0xff, 0x00), 0, 77),
    ];
    let index = PackIndex::parse(&PackIndex::write_v2(entries, &ObjectId::zero()))?;

    // The 0x7f bucket is fanout[0x7e]..fanout[0x7f] = 1..2: a single
    // candidate, found without scanning the rest of the table.
    assert_eq!(index.ids_with_first_byte(0x7f).len(), 1);
    assert_eq!(index.find(&id(0x7f, 0x11)), Some(40));
    assert_eq!(index.find(&id(0x7f, 0x22)), None);
    Ok(())
}

#[test]
fn delta_chains_resolve_inside_the_pack() -> anyhow::Result<()> {
    let dir = assert_fs::TempDir::new()?;

    let (pack_bytes, offsets) = build_pack(&[
        PackEntrySpec::Full(ObjectType::Blob, BASE.to_vec()),
        PackEntrySpec::OfsDelta(0, fox_delta()),
    ]);
    let base_id = ObjectId::for_object(ObjectType::Blob, BASE);
    let target_id = ObjectId::for_object(ObjectType::Blob, TARGET);
    let pack_path = install_pack(
        dir.path(),
        &pack_bytes,
        vec![(base_id, 0, offsets[0]), (target_id, 0, offsets[1])],
    );

    let pack = Pack::open(&pack_path)?;
    let raw = pack.read(&target_id, &NoBases)?.expect("delta resolves");
    assert_eq!(raw.kind(), ObjectType::Blob);
    assert_eq!(raw.payload().as_ref(), TARGET);

    // Delta correctness across the whole pack.
    pack.verify(&NoBases)?;
    Ok(())
}

#[test]
fn ref_delta_bases_come_from_the_composite_store() -> anyhow::Result<()> {
    let (dir, repo) = scratch_repo();
    let base_id = repo.objects().put(ObjectType::Blob, BASE)?;

    let (pack_bytes, offsets) = build_pack(&[PackEntrySpec::RefDelta(base_id, fox_delta())]);
    let target_id = ObjectId::for_object(ObjectType::Blob, TARGET);
    install_pack(
        &dir.path().join("objects/pack"),
        &pack_bytes,
        vec![(target_id, 0, offsets[0])],
    );

    // Remount so the new pack is visible.
    let store = ObjectStore::open(dir.path().join("objects"))?;
    let raw = store.get_raw(&target_id)?;
    assert_eq!(raw.payload().as_ref(), TARGET);
    Ok(())
}

#[test]
fn trailer_covers_all_preceding_bytes() -> anyhow::Result<()> {
    let (pack_bytes, _) = build_pack(&[PackEntrySpec::Full(ObjectType::Blob, BASE.to_vec())]);
    let body = &pack_bytes[..pack_bytes.len() - 20];
    let stored = &pack_bytes[pack_bytes.len() - 20..];
    assert_eq!(ObjectId::for_bytes(body).as_bytes(), stored);
    Ok(())
}

#[test]
fn corrupt_trailer_fails_verify_but_not_lookup() -> anyhow::Result<()> {
    let dir = assert_fs::TempDir::new()?;

    let (mut pack_bytes, offsets) =
        build_pack(&[PackEntrySpec::Full(ObjectType::Blob, BASE.to_vec())]);
    let base_id = ObjectId::for_object(ObjectType::Blob, BASE);

    // Flip a trailer byte after computing the index against the stored
    // (now wrong) checksum.
    let trailer_start = pack_bytes.len() - 20;
    pack_bytes[trailer_start] ^= 0xff;
    let pack_path = install_pack(dir.path(), &pack_bytes, vec![(base_id, 0, offsets[0])]);

    let pack = Pack::open(&pack_path)?;
    assert!(pack.read(&base_id, &NoBases)?.is_some());
    assert!(pack.verify(&NoBases).is_err());
    Ok(())
}

#[test]
fn corrupt_pack_does_not_mask_other_stores() -> anyhow::Result<()> {
    let (dir, repo) = scratch_repo();
    let loose_id = repo.objects().put(ObjectType::Blob, b"survives\n")?;

    // A pack whose index points past the end of the file.
    let (pack_bytes, _) = build_pack(&[PackEntrySpec::Full(ObjectType::Blob, BASE.to_vec())]);
    let bogus = ObjectId::for_object(ObjectType::Blob, BASE);
    install_pack(
        &dir.path().join("objects/pack"),
        &pack_bytes,
        vec![(bogus, 0, 9999)],
    );

    let store = ObjectStore::open(dir.path().join("objects"))?;
    // The broken pack claims the id but fails to serve it; the lookup
    // still finds loose objects.
    assert_eq!(store.get_raw(&loose_id)?.payload().as_ref(), b"survives\n");
    assert!(store.get_raw(&bogus).is_err());
    Ok(())
}
