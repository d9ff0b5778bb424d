// Data-Plane Broker: composing layer-2 virtual circuits across fabrics
// Copyright (C) 2022  The Data-Plane Broker developers
//
// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; either version 2 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along
// with this program; if not, write to the Free Software Foundation, Inc.,
// 51 Franklin Street, Fifth Floor, Boston, MA 02110-1301 USA.

//! Recovery of a persistent aggregator after a restart.

use crate::aggregate::{Aggregator, MemoryStore, ServiceStore};
use crate::net::{
    Circuit, Network, Segment, Service, ServiceStatus, TrafficFlow, TransientNetwork, Trunk,
};
use maplit::hashset;
use std::sync::Arc;
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(10);

fn island(name: &str) -> TransientNetwork {
    let net = TransientNetwork::new(name);
    net.add_terminal("t1").unwrap();
    net.add_terminal("up").unwrap();
    net.add_link("t1", "up", 1.0, 1000.0).unwrap();
    net
}

/// Assemble the same broker composition over the shared members and store, as the process
/// would after a restart.
fn build(
    a: &TransientNetwork,
    b: &TransientNetwork,
    store: &Arc<MemoryStore>,
) -> (Aggregator, Arc<Trunk>) {
    let broker = Aggregator::with_store("broker", store.clone() as Arc<dyn ServiceStore>);
    broker.add_network(Arc::new(a.clone())).unwrap();
    broker.add_network(Arc::new(b.clone())).unwrap();
    broker.add_terminal("left", a.get_terminal("t1").unwrap()).unwrap();
    broker.add_terminal("right", b.get_terminal("t1").unwrap()).unwrap();
    let trunk = broker
        .add_trunk(&a.get_terminal("up").unwrap(), &b.get_terminal("up").unwrap(), 1.0, 100.0)
        .unwrap();
    trunk.define_label_range(1, 10, 1).unwrap();
    (broker, trunk)
}

fn segment(broker: &Aggregator, label: u32, rate: f64) -> Segment {
    Segment::new(vec![
        (
            Circuit::new(broker.get_terminal("left").unwrap(), label),
            TrafficFlow::new(rate, rate),
        ),
        (
            Circuit::new(broker.get_terminal("right").unwrap(), label),
            TrafficFlow::new(rate, rate),
        ),
    ])
}

#[test]
fn test_recovery_after_restart() {
    crate::test::init_logging();
    let a = island("a");
    let b = island("b");
    let store = Arc::new(MemoryStore::new());

    // first life: one activated service, one merely defined
    let (id1, id2) = {
        let (broker, trunk) = build(&a, &b, &store);
        let s1 = broker.new_service().unwrap();
        s1.define(segment(&broker, 7, 10.0)).unwrap();
        s1.activate().unwrap();
        assert_eq!(
            s1.await_status(&hashset![ServiceStatus::Active], WAIT),
            ServiceStatus::Active
        );
        let s2 = broker.new_service().unwrap();
        s2.define(segment(&broker, 8, 5.0)).unwrap();
        assert_eq!(
            s2.await_status(&hashset![ServiceStatus::Inactive], WAIT),
            ServiceStatus::Inactive
        );
        assert_eq!(trunk.allocated_labels(), hashset![1, 2]);
        (s1.id(), s2.id())
    };

    // the members keep their slices across the broker's restart
    assert_eq!(a.services().len(), 2);
    assert_eq!(b.services().len(), 2);

    // one member forgot a slice: it must be recreated from its record
    let records = store.load().unwrap();
    let lost = records
        .iter()
        .find(|r| r.id == id2)
        .unwrap()
        .subordinates
        .iter()
        .find(|s| s.network == "a")
        .unwrap()
        .handle;
    a.get_service(lost).unwrap().release().unwrap();
    assert_eq!(a.services().len(), 1);

    // second life
    let (broker, trunk) = build(&a, &b, &store);
    // stale backend state: the two recorded labels plus one orphan
    trunk.allocate_tunnel(0.0).unwrap();
    trunk.allocate_tunnel(0.0).unwrap();
    trunk.allocate_tunnel(0.0).unwrap();
    broker.recover().unwrap();

    assert_eq!(broker.services().len(), 2);
    let r1 = broker.get_service(id1).unwrap();
    let r2 = broker.get_service(id2).unwrap();

    // the intent-true service comes back active, the other settles established
    assert_eq!(
        r1.await_status(&hashset![ServiceStatus::Active], WAIT),
        ServiceStatus::Active
    );
    assert_eq!(
        r2.await_status(&hashset![ServiceStatus::Inactive], WAIT),
        ServiceStatus::Inactive
    );

    // only the union of the recorded labels was retained; the orphan is gone
    assert_eq!(trunk.allocated_labels(), hashset![1, 2]);
    // the forgotten slice was recreated, nothing was duplicated
    assert_eq!(a.services().len(), 2);
    assert_eq!(b.services().len(), 2);

    // releasing a recovered service returns its tunnel and deletes its record
    r1.release().unwrap();
    assert_eq!(trunk.allocated_labels(), hashset![2]);
    assert_eq!(store.load().unwrap().len(), 1);
    assert_eq!(a.services().len(), 1);
}

#[test]
fn test_recover_without_store_is_a_no_op() {
    let a = island("a");
    let b = island("b");
    let broker = Aggregator::new("broker");
    broker.add_network(Arc::new(a.clone())).unwrap();
    broker.add_network(Arc::new(b)).unwrap();
    broker.recover().unwrap();
    assert!(broker.services().is_empty());
}

#[test]
fn test_definitions_survive_recovery() {
    let a = island("a");
    let b = island("b");
    let store = Arc::new(MemoryStore::new());
    let id = {
        let (broker, _trunk) = build(&a, &b, &store);
        let service = broker.new_service().unwrap();
        service.define(segment(&broker, 7, 10.0)).unwrap();
        service.await_status(&hashset![ServiceStatus::Inactive], WAIT);
        service.id()
    };
    let (broker, _trunk) = build(&a, &b, &store);
    broker.recover().unwrap();
    let recovered = broker.get_service(id).unwrap();
    let definition = recovered.definition().unwrap();
    assert_eq!(definition.degree(), 2);
    assert!(definition
        .circuits()
        .any(|c| *c == Circuit::new(broker.get_terminal("left").unwrap(), 7)));
}
