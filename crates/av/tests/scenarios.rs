//! End-to-end address vector scenarios: dedup, restart races, capacity and
//! addressing modes.

use assert_matches::assert_matches;
use rdm_av::{
    AddressVector, AhTable, AvConfig, AvError, AvType, EpAddr, FiAddr, Gid, HistoryRetention,
    InsertResult, LoopbackAhProvider, Resource,
};
use rdm_observability::init_test_logging;

fn gid(host: u8) -> Gid {
    let mut bytes = [0u8; 16];
    bytes[0] = 0xfe;
    bytes[1] = 0x80;
    bytes[15] = host;
    Gid::new(bytes)
}

fn open(config: AvConfig) -> AddressVector<LoopbackAhProvider> {
    init_test_logging();
    AddressVector::open(LoopbackAhProvider::new(), config).unwrap()
}

#[test]
fn test_address_handle_acquire_release_cycle() {
    init_test_logging();
    let mut table = AhTable::new(LoopbackAhProvider::new(), 16);
    let raw = gid(1);

    let first = table.acquire(&raw).unwrap();
    let second = table.acquire(&raw).unwrap();
    assert_eq!(first, second);
    assert_eq!(table.get(first).unwrap().refcnt(), 2);

    table.release(first).unwrap();
    table.release(second).unwrap();
    assert!(table.lookup(&raw).is_none());
    assert!(table.get(first).is_none());
    assert_matches!(table.release(first), Err(AvError::InvalidHandle));
}

#[test]
fn test_duplicate_insert_does_not_double_count() {
    let mut av = open(AvConfig::default());
    let addr = EpAddr::new(gid(1), 7, 1);

    let first = av.insert(&addr).unwrap();
    let second = av.insert(&addr).unwrap();

    assert_eq!(first.fi_addr(), second.fi_addr());
    assert_matches!(second, InsertResult::Existing(_));
    let ahn = av.resolve_forward(first.fi_addr()).unwrap().ahn();
    assert_eq!(av.address_handle(ahn.get()).unwrap().refcnt(), 1);

    // A second queue on the same device shares the handle.
    av.insert(&EpAddr::new(gid(1), 8, 1)).unwrap();
    assert_eq!(av.address_handle(ahn.get()).unwrap().refcnt(), 2);
    assert_eq!(av.address_handles(), 1);
}

/// Peer restarts on the same queue with a new connection identifier.
fn restart(history: HistoryRetention) -> (AddressVector<LoopbackAhProvider>, u16, FiAddr, FiAddr) {
    let mut av = open(AvConfig::default().with_history(history));

    let c1 = av.insert(&EpAddr::new(gid(5), 7, 1)).unwrap().fi_addr();
    let ahn = av.resolve_forward(c1).unwrap().ahn().get();
    av.remove(c1).unwrap();

    let c2 = av.insert(&EpAddr::new(gid(5), 7, 2)).unwrap().fi_addr();
    assert_eq!(av.resolve_forward(c2).unwrap().ahn().get(), ahn);

    (av, ahn, c1, c2)
}

#[test]
fn test_restart_with_retained_history() {
    let (av, ahn, c1, c2) = restart(HistoryRetention::Retain);

    assert_eq!(av.resolve_current(ahn, 7).unwrap().fi_addr(), c2);
    assert_eq!(av.resolve_exact(ahn, 7, 2).unwrap().fi_addr(), c2);

    let old = av.resolve_exact(ahn, 7, 1).unwrap();
    assert!(!old.is_live());
    assert_eq!(old.connid(), 1);
    assert_eq!(old.fi_addr(), c1);

    // A delayed packet from the first incarnation is not routed to the second.
    assert_eq!(av.resolve_packet(ahn, 7, Some(1)).unwrap().connid(), 1);
    assert_eq!(av.resolve_packet(ahn, 7, Some(2)).unwrap().connid(), 2);
}

#[test]
fn test_restart_with_pruned_history() {
    let (av, ahn, _, c2) = restart(HistoryRetention::Prune);

    assert_eq!(av.resolve_current(ahn, 7).unwrap().fi_addr(), c2);
    assert_eq!(av.resolve_exact(ahn, 7, 2).unwrap().fi_addr(), c2);
    assert_matches!(av.resolve_exact(ahn, 7, 1), Err(AvError::NotFound));
    assert_matches!(av.resolve_packet(ahn, 7, Some(1)), Err(AvError::NotFound));
}

#[test]
fn test_restart_while_old_connection_live() {
    let mut av = open(AvConfig::default());
    let c1 = av.insert(&EpAddr::new(gid(5), 7, 1)).unwrap().fi_addr();
    let c2 = av.insert(&EpAddr::new(gid(5), 7, 2)).unwrap().fi_addr();
    let ahn = av.resolve_forward(c1).unwrap().ahn().get();

    assert_eq!(av.resolve_current(ahn, 7).unwrap().fi_addr(), c2);
    assert_eq!(av.resolve_exact(ahn, 7, 1).unwrap().fi_addr(), c1);

    // Removing the superseded connection leaves the current one in place.
    av.remove(c1).unwrap();
    assert_eq!(av.resolve_current(ahn, 7).unwrap().fi_addr(), c2);
    assert_matches!(av.resolve_exact(ahn, 7, 1), Err(AvError::NotFound));
}

#[test]
fn test_removed_identifier_not_found() {
    let mut av = open(AvConfig::default());
    let fi_addr = av.insert(&EpAddr::new(gid(1), 1, 1)).unwrap().fi_addr();

    av.remove(fi_addr).unwrap();

    assert_matches!(av.resolve_forward(fi_addr), Err(AvError::NotFound));
    assert_matches!(av.lookup(fi_addr), Err(AvError::NotFound));
    assert_matches!(av.remove(fi_addr), Err(AvError::NotFound));
}

#[test]
fn test_capacity_limit() {
    let mut av = open(AvConfig::default().with_count(2));

    let a = av.insert(&EpAddr::new(gid(1), 1, 1)).unwrap().fi_addr();
    av.insert(&EpAddr::new(gid(2), 1, 1)).unwrap();
    assert_matches!(
        av.insert(&EpAddr::new(gid(3), 1, 1)),
        Err(AvError::ResourceExhausted(Resource::Connections))
    );
    // The failed insert left nothing behind.
    assert_eq!(av.used(), 2);
    assert_eq!(av.address_handles(), 2);
    assert_eq!(av.provider().live(), 2);

    av.remove(a).unwrap();
    assert!(av.insert(&EpAddr::new(gid(3), 1, 1)).unwrap().is_new());
}

#[test]
fn test_device_handle_exhaustion_is_atomic() {
    init_test_logging();
    let mut av: AddressVector<LoopbackAhProvider> =
        AddressVector::open(LoopbackAhProvider::with_capacity(1), AvConfig::default()).unwrap();

    av.insert(&EpAddr::new(gid(1), 1, 1)).unwrap();
    assert_matches!(
        av.insert(&EpAddr::new(gid(2), 1, 1)),
        Err(AvError::ResourceExhausted(Resource::AddressHandles))
    );
    assert_eq!(av.used(), 1);
    assert_eq!(av.connections().count(), 1);
}

#[test]
fn test_index_mode_dense_and_reused() {
    let mut av = open(AvConfig::default().with_av_type(AvType::Table));

    let ids: Vec<_> = (1..=4)
        .map(|host| av.insert(&EpAddr::new(gid(host), 1, 1)).unwrap().fi_addr())
        .collect();
    assert_eq!(ids, (0..4).map(FiAddr::new).collect::<Vec<_>>());

    av.remove(FiAddr::new(2)).unwrap();
    let reused = av.insert(&EpAddr::new(gid(9), 1, 1)).unwrap().fi_addr();
    assert_eq!(reused, FiAddr::new(2));
    assert_eq!(av.lookup(reused).unwrap().gid(), &gid(9));
}

#[test]
fn test_direct_mode_identity() {
    let mut av = open(AvConfig::default().with_av_type(AvType::Map));

    let a = av.insert(&EpAddr::new(gid(1), 1, 1)).unwrap().fi_addr();
    let b = av.insert(&EpAddr::new(gid(2), 1, 1)).unwrap().fi_addr();
    let a_again = av.insert(&EpAddr::new(gid(1), 1, 1)).unwrap().fi_addr();

    assert_ne!(a, b);
    assert_eq!(a, a_again);
    assert!(std::ptr::eq(
        av.resolve_forward(a).unwrap(),
        av.resolve_forward(a_again).unwrap()
    ));
    assert_eq!(av.resolve_forward(b).unwrap().ep_addr().gid(), &gid(2));
}

#[test]
fn test_direct_mode_retained_keeps_identity_reserved() {
    let mut av = open(
        AvConfig::default()
            .with_av_type(AvType::Map)
            .with_history(HistoryRetention::Retain),
    );

    let a = av.insert(&EpAddr::new(gid(1), 1, 1)).unwrap().fi_addr();
    av.remove(a).unwrap();
    let b = av.insert(&EpAddr::new(gid(1), 1, 2)).unwrap().fi_addr();

    // The retired record still occupies its slot, so the new peer cannot
    // inherit the old identifier.
    assert_ne!(a, b);
    assert_matches!(av.resolve_forward(a), Err(AvError::NotFound));
}
