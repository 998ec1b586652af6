//! Persistence properties of the state file across open/close cycles.

use airwalk::callsign::Callsign;
use airwalk::layout::{self, header};
use airwalk::state::StateFile;
use tempfile::NamedTempFile;

fn parse(cs: &str) -> Callsign {
    Callsign::parse(cs).unwrap()
}

#[test]
fn test_empty_file_becomes_header_only_state() {
    let temp = NamedTempFile::new().unwrap();
    {
        let state = StateFile::open(temp.path()).unwrap();
        assert_eq!(state.len(), 0);
    }
    assert_eq!(
        std::fs::metadata(temp.path()).unwrap().len(),
        header::SIZE
    );
}

#[test]
fn test_reopen_without_writes_is_byte_identical() {
    let temp = NamedTempFile::new().unwrap();
    {
        let state = StateFile::open(temp.path()).unwrap();
        for name in ["K9XYZ", "W1ABC-3", "K1RLY"] {
            state.append_node(&parse(name)).unwrap();
        }
    }
    let before = std::fs::read(temp.path()).unwrap();
    {
        let _state = StateFile::open(temp.path()).unwrap();
    }
    let after = std::fs::read(temp.path()).unwrap();
    assert_eq!(before, after);
}

#[test]
fn test_iteration_is_reverse_insertion_and_set_preserved() {
    let temp = NamedTempFile::new().unwrap();
    let names: Vec<String> = (0..40).map(|i| format!("K{i}ABC-{}", i % 16)).collect();
    {
        let state = StateFile::open(temp.path()).unwrap();
        for name in &names {
            state.append_node(&parse(name)).unwrap();
        }
    }

    let state = StateFile::open(temp.path()).unwrap();
    assert_eq!(state.len(), names.len());
    let guard = state.lock();
    let listed: Vec<String> = guard
        .nodes()
        .map(|n| guard.callsign(n.unwrap()).unwrap().as_str().to_string())
        .collect();
    let mut expected = names.clone();
    expected.reverse();
    assert_eq!(listed, expected);
}

#[test]
fn test_repeated_append_yields_one_node() {
    let temp = NamedTempFile::new().unwrap();
    let state = StateFile::open(temp.path()).unwrap();
    let cs = parse("K9XYZ-4");
    let first = state.append_node(&cs).unwrap();
    for _ in 0..5 {
        assert_eq!(state.append_node(&cs).unwrap(), first);
    }
    assert_eq!(state.len(), 1);
    assert_eq!(state.find(&cs), Some(first));
}

#[test]
fn test_framing_bytes_bracket_every_node_on_disk() {
    let temp = NamedTempFile::new().unwrap();
    let offsets: Vec<u64>;
    {
        let state = StateFile::open(temp.path()).unwrap();
        for name in ["K9XYZ", "W1ABC", "K1RLY-7"] {
            state.append_node(&parse(name)).unwrap();
        }
        let guard = state.lock();
        offsets = guard.nodes().map(|n| n.unwrap().offset()).collect();
    }

    let bytes = std::fs::read(temp.path()).unwrap();
    assert_eq!(bytes[0], layout::FRAMING_START);
    for at in offsets {
        let at = at as usize;
        assert_eq!(bytes[at], layout::FRAMING_START);
        assert_eq!(bytes[at + 44], layout::FRAMING_END);
    }
}

#[test]
fn test_index_matches_list_exactly_once_after_reload() {
    let temp = NamedTempFile::new().unwrap();
    let names = ["K9XYZ", "W1ABC", "N0CALL-1", "K1RLY-15"];
    {
        let state = StateFile::open(temp.path()).unwrap();
        for name in names {
            state.append_node(&parse(name)).unwrap();
        }
    }

    let state = StateFile::open(temp.path()).unwrap();
    let guard = state.lock();
    let mut listed: Vec<String> = guard
        .nodes()
        .map(|n| guard.callsign(n.unwrap()).unwrap().as_str().to_string())
        .collect();
    listed.sort();
    let mut expected: Vec<String> = names.iter().map(|n| n.to_string()).collect();
    expected.sort();
    assert_eq!(listed, expected);

    for name in names {
        let cs = parse(name);
        let node = guard.find(&cs).expect("indexed");
        assert_eq!(guard.callsign(node).unwrap(), cs);
    }
}

#[test]
fn test_pending_partition_by_visit_serial() {
    let temp = NamedTempFile::new().unwrap();
    {
        let state = StateFile::open(temp.path()).unwrap();
        let visited = state.append_node(&parse("K9XYZ")).unwrap();
        state.append_node(&parse("W1ABC")).unwrap();
        state.append_node(&parse("K1RLY")).unwrap();
        state.mark_visited(visited).unwrap();
    }

    let state = StateFile::open(temp.path()).unwrap();
    let guard = state.lock();
    let serial = guard.visit_serial().unwrap();
    let pending: Vec<_> = guard.pending().collect();
    for node in guard.nodes().map(|n| n.unwrap()) {
        let count = guard.query_count(node).unwrap();
        if pending.contains(&node) {
            assert!(count < serial);
        } else {
            assert!(count >= serial);
        }
    }
    assert_eq!(pending.len(), 2);
}

#[test]
fn test_edges_survive_reload() {
    let temp = NamedTempFile::new().unwrap();
    {
        let state = StateFile::open(temp.path()).unwrap();
        let a = state.append_node(&parse("K9XYZ")).unwrap();
        let b = state.append_node(&parse("W1ABC")).unwrap();
        let c = state.append_node(&parse("K1RLY")).unwrap();
        state.link_edge(a, b).unwrap();
        state.link_edge(a, c).unwrap();
    }

    let state = StateFile::open(temp.path()).unwrap();
    let guard = state.lock();
    let a = guard.find(&parse("K9XYZ")).unwrap();
    let neighbours: Vec<String> = guard
        .neighbours(a)
        .map(|n| guard.callsign(n.unwrap()).unwrap().as_str().to_string())
        .collect();
    // Most recently linked first.
    assert_eq!(neighbours, ["K1RLY", "W1ABC"]);
}

#[test]
fn test_root_list_is_subset_of_all_nodes() {
    let temp = NamedTempFile::new().unwrap();
    {
        let state = StateFile::open(temp.path()).unwrap();
        state.append_root_node(&parse("N0CALL-1")).unwrap();
        state.append_node(&parse("K9XYZ")).unwrap();
    }

    let state = StateFile::open(temp.path()).unwrap();
    let guard = state.lock();
    let all: Vec<_> = guard.nodes().map(|n| n.unwrap()).collect();
    let roots: Vec<_> = guard.root_nodes().map(|n| n.unwrap()).collect();
    assert_eq!(roots.len(), 1);
    assert!(roots.iter().all(|r| all.contains(r)));
    assert_eq!(guard.callsign(roots[0]).unwrap(), parse("N0CALL-1"));
}
