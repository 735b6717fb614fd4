use foxely_core::config::VmConfig;

use super::helpers::*;

const WORKLOAD: &str = "
class Node {
    init(value, next) { this.value = value; this.next = next; }
}
fun build(n) {
    var head = nil;
    for (var i = 0; i < n; i = i + 1) head = Node(\"n\" + str(i), head);
    return head;
}
fun sum(list) {
    var total = 0;
    while (list != nil) { total = total + list.value.size(); list = list.next; }
    return total;
}
var adders = [];
for (var i = 0; i < 5; i = i + 1) {
    var k = i;
    adders.push(fun (x) { return x + k; });
}
var m = {};
for (var i = 0; i < 20; i = i + 1) m[\"key\" + str(i)] = [i, i * 2];
print sum(build(30));
print adders[4](10);
print m[\"key7\"][1];
print \"a\" + \"b\" + \"c\";
";

const WORKLOAD_OUTPUT: &str = "80\n14\n14\nabc\n";

fn stress_config() -> VmConfig {
    VmConfig {
        gc_stress: true,
        ..VmConfig::default()
    }
}

#[test]
fn test_workload_survives_stress_collection() {
    let mut harness = Harness::with_config(stress_config());
    assert_eq!(harness.run_ok(WORKLOAD), WORKLOAD_OUTPUT);
    assert!(harness.vm.gc_stats().collections > 0);
}

#[test]
fn test_stress_matches_normal_run() {
    assert_eq!(run_fox(WORKLOAD), WORKLOAD_OUTPUT);
}

#[test]
fn test_small_threshold_triggers_collections() {
    let config = VmConfig {
        gc_initial_threshold: 16,
        ..VmConfig::default()
    };
    let mut harness = Harness::with_config(config);
    assert_eq!(harness.run_ok(WORKLOAD), WORKLOAD_OUTPUT);
    let stats = harness.vm.gc_stats();
    assert!(stats.collections > 0);
    assert!(stats.freed > 0);
}

#[test]
fn test_dropped_objects_are_reclaimed() {
    let mut harness = Harness::new();
    harness.run_ok(
        "var big = [];
         for (var i = 0; i < 200; i = i + 1) big.push([i]);",
    );
    harness.vm.collect_garbage();
    let before = harness.vm.gc_stats().live;

    harness.run_ok("big = nil;");
    harness.vm.collect_garbage();
    let after = harness.vm.gc_stats().live;
    assert!(before >= after + 100, "live before {} after {}", before, after);
}

#[test]
fn test_globals_survive_collection() {
    let mut harness = Harness::new();
    harness.run_ok("var kept = [\"x\", {\"y\": 1}];");
    harness.vm.collect_garbage();
    harness.vm.collect_garbage();
    assert_eq!(harness.run_ok("print kept;"), "[x, {y: 1}]\n");
}

#[test]
fn test_suspended_fiber_stack_is_a_root() {
    let mut harness = Harness::with_config(stress_config());
    harness.run_ok(
        "var f = Fiber.new(fun () {
             var local = [\"held\", \"by\", \"fiber\"];
             Fiber.yield(nil);
             print local.join(\" \");
         });
         f.call();",
    );
    harness.vm.collect_garbage();
    assert_eq!(harness.run_ok("f.call();"), "held by fiber\n");
}
