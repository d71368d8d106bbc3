//! End-to-end block lifecycle through the ledger.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use scriv_engine::{
    BlockRole, BlockState, Ledger, Owner, TimelineEvent, TransitionError, ValidationCondition,
    lock_block,
};

use crate::common::{Recorder, nested_ids, ready_block, top_level_ids};

#[tokio::test]
async fn empty_assistant_block_is_fixed_and_retried() {
    let recorder = Recorder::new();
    let ledger = Ledger::new(recorder.handler());
    ledger.start();

    let b1 = ledger.timeline().add_live_block(BlockRole::Assistant, "");
    let id = lock_block(&b1).id();

    let err = ledger.inscribe(id).unwrap_err();
    assert!(matches!(err, TransitionError::Validation { .. }));
    assert!(err.failed_conditions().contains(&ValidationCondition::ContentComplete));
    assert!(ledger.timeline().get_block(id).unwrap().as_live().is_some());

    {
        let mut block = lock_block(&b1);
        block.append_content("done").unwrap();
        block.set_progress(1.0).unwrap();
    }
    ledger.inscribe_and_publish(id).unwrap();
    ledger.shutdown().await;

    assert_eq!(lock_block(&b1).state(), BlockState::Inscribed);
    let record = ledger.timeline().get_block(id).unwrap();
    assert_eq!(record.as_inscribed().unwrap().content(), "done");
    assert_eq!(recorder.lines(), vec!["done"]);
}

#[test]
fn parent_waits_for_sub_block() {
    let recorder = Recorder::new();
    let ledger = Ledger::new(recorder.handler());
    let timeline = ledger.timeline();

    let p = timeline.add_live_block(BlockRole::Tool, "run suite");
    let p_id = lock_block(&p).id();
    let s_id = timeline
        .add_sub_block(p_id, BlockRole::SubStep, "unit tests")
        .unwrap();
    lock_block(&p)
        .update_sub_block(s_id, |s| s.set_progress(0.4))
        .unwrap();

    let err = ledger.inscribe(p_id).unwrap_err();
    assert_eq!(err.failed_conditions(), &[ValidationCondition::SubBlocksReady]);

    lock_block(&p)
        .update_sub_block(s_id, |s| s.set_progress(1.0))
        .unwrap();
    let record = ledger.inscribe(p_id).unwrap();
    assert_eq!(record.sub_blocks()[0].id(), s_id);
    assert_eq!(timeline.owner_of(s_id), Some(Owner::Parent(p_id)));
}

#[test]
fn inscription_captures_every_sub_block() {
    let recorder = Recorder::new();
    let ledger = Ledger::new(recorder.handler());
    let timeline = ledger.timeline();

    let parent = ready_block(timeline, BlockRole::Tool, "batch");
    let mut expected = Vec::new();
    for n in 0..7 {
        let content = format!("step {n}");
        let child = timeline
            .add_sub_block(parent, BlockRole::SubStep, content.clone())
            .unwrap();
        expected.push((child, content));
    }
    let handle = timeline.get_block(parent).unwrap().as_live().cloned().unwrap();
    {
        let mut block = lock_block(&handle);
        for (child, _) in &expected {
            block.update_sub_block(*child, |c| c.set_progress(1.0)).unwrap();
        }
    }

    let record = ledger.inscribe(parent).unwrap();
    let captured: Vec<_> = record
        .sub_blocks()
        .iter()
        .map(|child| (child.id(), child.content().to_string()))
        .collect();
    assert_eq!(captured, expected);

    let json = record.to_json();
    let serialized = json["sub_blocks"].as_array().unwrap();
    assert_eq!(serialized.len(), expected.len());
    for (entry, (child, content)) in serialized.iter().zip(&expected) {
        assert_eq!(entry["id"], child.as_uuid().to_string());
        assert_eq!(entry["content"], content.as_str());
        assert_eq!(entry["progress"], 1.0);
    }
}

#[test]
fn ownership_stays_exclusive_across_operations() {
    let recorder = Recorder::new();
    let ledger = Ledger::new(recorder.handler());
    let timeline = ledger.timeline();
    let mut created = Vec::new();

    let check = |created: &[scriv_engine::BlockId]| {
        let top: HashSet<_> = top_level_ids(timeline).into_iter().collect();
        let nested: Vec<_> = nested_ids(timeline);
        let nested_set: HashSet<_> = nested.iter().copied().collect();
        assert_eq!(nested.len(), nested_set.len(), "sub-block reachable twice");
        assert!(top.is_disjoint(&nested_set), "block both top-level and nested");
        for id in created {
            match timeline.owner_of(*id) {
                Some(Owner::Timeline) => assert!(top.contains(id)),
                Some(Owner::Parent(_)) => assert!(nested_set.contains(id)),
                other => panic!("block {id} has owner {other:?}"),
            }
        }
    };

    for round in 0..5 {
        let parent = ready_block(timeline, BlockRole::Assistant, &format!("turn {round}"));
        created.push(parent);
        check(&created);

        for step in 0..round {
            let child = timeline
                .add_sub_block(parent, BlockRole::SubStep, format!("{round}.{step}"))
                .unwrap();
            created.push(child);
            check(&created);
        }

        let handle = timeline.get_block(parent).unwrap().as_live().cloned().unwrap();
        {
            let mut block = lock_block(&handle);
            let children: Vec<_> = block.sub_blocks().iter().map(|c| c.id()).collect();
            for child in children {
                block.update_sub_block(child, |c| c.set_progress(1.0)).unwrap();
            }
        }
        if round % 2 == 0 {
            ledger.inscribe(parent).unwrap();
        }
        check(&created);
    }

    // Inscribed records cannot be re-parented or re-added.
    let inscribed = timeline.inscribed_records();
    assert_eq!(inscribed.len(), 3);
    for record in inscribed {
        assert!(timeline.add_sub_block(record.id(), BlockRole::SubStep, "x").is_err());
    }
    check(&created);
}

#[test]
fn observers_see_one_way_state_sequence() {
    let recorder = Recorder::new();
    let ledger = Ledger::new(recorder.handler());
    let timeline = ledger.timeline();

    let states = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&states);
    timeline.add_observer(move |event| {
        let state = match event {
            TimelineEvent::BlockAdded(block) | TimelineEvent::BlockUpdated(block) => block.state(),
            TimelineEvent::BlockInscribed { .. } | TimelineEvent::BlockRemoved { .. } => return,
        };
        let mut states = sink.lock().unwrap();
        if states.last() != Some(&state) {
            states.push(state);
        }
    });

    let handle = timeline.add_live_block(BlockRole::Assistant, "");
    let id = lock_block(&handle).id();
    let _ = ledger.inscribe(id);
    lock_block(&handle).append_content("text").unwrap();
    ledger.inscribe(id).unwrap();
    assert!(ledger.inscribe(id).is_err());
    assert!(lock_block(&handle).append_content("late").is_err());

    assert_eq!(
        *states.lock().unwrap(),
        vec![BlockState::Live, BlockState::Transitioning, BlockState::Inscribed]
    );
}
