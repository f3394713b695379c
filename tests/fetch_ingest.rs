mod common;

use common::{DeltaBuilder, PackEntrySpec, build_pack, scratch_repo};
use packrat::{
    CancellationToken, Error, GraphWalker, NoProgress, ObjectId, ObjectType, PackError,
    ingest_pack,
};
use pretty_assertions::assert_eq;
use std::collections::BTreeMap;

const BASE: &[u8] = b"The quick brown fox\n";
const TARGET: &[u8] = b"The slow brown fox\n";

fn fox_delta() -> Vec<u8> {
    DeltaBuilder::new(BASE.len(), TARGET.len())
        .copy(0, 4)
        .insert(b"slow")
        .copy(9, 11)
        .build()
}

#[test]
fn ingest_indexes_full_and_delta_entries() -> anyhow::Result<()> {
    let (dir, mut repo) = scratch_repo();

    // A thin pack: one full blob, one ofs-delta against it, and one
    // ref-delta whose base lives only in the local store.
    let external_base = repo.objects().put(ObjectType::Blob, b"external base\n")?;
    let external_target = b"external base\nplus a line\n";
    let external_delta = DeltaBuilder::new(14, external_target.len())
        .copy(0, 14)
        .insert(b"plus a line\n")
        .build();

    let (pack_bytes, _) = build_pack(&[
        PackEntrySpec::Full(ObjectType::Blob, BASE.to_vec()),
        PackEntrySpec::OfsDelta(0, fox_delta()),
        PackEntrySpec::RefDelta(external_base, external_delta),
    ]);

    let outcome = ingest_pack(
        pack_bytes.as_slice(),
        repo.objects_mut(),
        &mut NoProgress,
        &CancellationToken::new(),
    )?;
    assert_eq!(outcome.object_count, 3);
    assert!(outcome.pack_path.is_file());
    assert!(outcome.index_path.is_file());
    assert!(
        outcome
            .index_path
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("pack-")
    );

    // Everything in the pack is now resolvable through the store.
    for payload in [BASE, TARGET, external_target.as_slice()] {
        let id = ObjectId::for_object(ObjectType::Blob, payload);
        assert_eq!(repo.objects().get_raw(&id)?.payload().as_ref(), payload);
    }

    // A fresh mount sees the published pack too.
    let reopened = packrat::ObjectStore::open(dir.path().join("objects"))?;
    let target_id = ObjectId::for_object(ObjectType::Blob, TARGET);
    assert!(reopened.contains(&target_id));
    Ok(())
}

#[test]
fn corrupted_stream_is_rejected_and_leaves_nothing() -> anyhow::Result<()> {
    let (dir, mut repo) = scratch_repo();

    let (mut pack_bytes, _) =
        build_pack(&[PackEntrySpec::Full(ObjectType::Blob, BASE.to_vec())]);
    let last = pack_bytes.len() - 1;
    pack_bytes[last] ^= 0xff;

    let result = ingest_pack(
        pack_bytes.as_slice(),
        repo.objects_mut(),
        &mut NoProgress,
        &CancellationToken::new(),
    );
    assert!(matches!(
        result,
        Err(Error::Pack(PackError::TrailerMismatch { .. }))
    ));

    // No pack was published, no temp file left behind.
    let leftovers: Vec<_> = std::fs::read_dir(dir.path().join("objects/pack"))?
        .filter_map(|e| e.ok())
        .collect();
    assert!(leftovers.is_empty(), "{leftovers:?}");
    Ok(())
}

#[test]
fn missing_ref_delta_base_fails_the_ingest() -> anyhow::Result<()> {
    let (_dir, mut repo) = scratch_repo();

    let absent = ObjectId::from_raw([0x99; 20]);
    let (pack_bytes, _) = build_pack(&[PackEntrySpec::RefDelta(absent, fox_delta())]);

    let result = ingest_pack(
        pack_bytes.as_slice(),
        repo.objects_mut(),
        &mut NoProgress,
        &CancellationToken::new(),
    );
    assert!(matches!(
        result,
        Err(Error::Pack(PackError::MissingBase(id))) if id == absent
    ));
    Ok(())
}

#[test]
fn cancellation_aborts_the_ingest() -> anyhow::Result<()> {
    let (_dir, mut repo) = scratch_repo();
    let (pack_bytes, _) = build_pack(&[PackEntrySpec::Full(ObjectType::Blob, BASE.to_vec())]);

    let cancel = CancellationToken::new();
    cancel.cancel();
    let result = ingest_pack(
        pack_bytes.as_slice(),
        repo.objects_mut(),
        &mut NoProgress,
        &cancel,
    );
    assert!(matches!(result, Err(Error::Cancelled)));
    Ok(())
}

#[test]
fn wants_and_negotiation_round() -> anyhow::Result<()> {
    let (_dir, repo) = scratch_repo();

    let known = repo.objects().put(ObjectType::Blob, b"already here\n")?;
    let wanted = ObjectId::from_raw([0x77; 20]);
    let advertised = BTreeMap::from([
        ("refs/heads/main".to_string(), wanted),
        ("refs/heads/stale".to_string(), known),
        ("refs/tags/v1^{}".to_string(), ObjectId::from_raw([0x78; 20])),
    ]);

    assert_eq!(repo.objects().determine_wants_all(&advertised), vec![wanted]);

    // With an empty local graph there is nothing to offer as "have".
    let mut walker = GraphWalker::new(repo.objects(), []);
    assert_eq!(walker.next()?, None);
    Ok(())
}
