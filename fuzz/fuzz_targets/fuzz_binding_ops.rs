#![no_main]

//! Drives random rewiring, writes and binding lifecycle calls against a small
//! object graph and checks that the bound target always mirrors the value at
//! the end of the path, and that sync marks never leak.

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use propbind::{Binding, Class, Converted, Object, Property, SyncGuard, Value, ValueType, has_change};

const NODES: usize = 4;

#[derive(Arbitrary, Debug)]
enum Op {
    Link { from: u8, to: Option<u8> },
    Write { node: u8, value: i16 },
    WriteTarget { value: i16 },
    TwoWay(bool),
    Negate(bool),
    Unbind,
    Bind,
}

#[derive(Arbitrary, Debug)]
struct Input {
    depth: u8,
    ops: Vec<Op>,
}

fuzz_target!(|input: Input| {
    let Ok(value) = Property::builder("value")
        .value_type(ValueType::Number)
        .default_value(0)
        .observable()
        .build()
    else {
        return;
    };
    let Ok(next) = Property::builder("next")
        .value_type(ValueType::Object(None))
        .observable()
        .build()
    else {
        return;
    };
    let class = Class::builder("Node").property(&value).property(&next).build();

    let nodes: Vec<Object> = (0..NODES).map(|_| Object::new(&class)).collect();
    let target = Object::new(&class);
    let depth = usize::from(input.depth % 3) + 1;
    let path: Vec<&str> = std::iter::repeat_n("next", depth)
        .chain(std::iter::once("value"))
        .collect();

    let guard = SyncGuard::new();
    let Ok(binding) = Binding::with_guard(&nodes[0], path, guard.clone()) else {
        return;
    };
    if binding.assign_to(&target, "value").is_err() {
        return;
    }
    let mut negated = false;

    for op in input.ops.into_iter().take(64) {
        let _ = match op {
            Op::Link { from, to } => {
                let link = to.map(|i| nodes[usize::from(i) % NODES].clone());
                nodes[usize::from(from) % NODES].set(&next, link)
            }
            Op::Write { node, value: v } => {
                nodes[usize::from(node) % NODES].set(&value, i32::from(v))
            }
            // a one-way target written by hand stays stale until the next sync
            Op::WriteTarget { value: v } if binding.is_two_way() || !binding.is_bound() => {
                target.set(&value, i32::from(v))
            }
            Op::WriteTarget { .. } => Ok(()),
            Op::TwoWay(on) => binding.two_way(on).map(|_| ()),
            Op::Negate(on) => {
                negated = on;
                let result = if on {
                    binding.converter(|v| match v.as_ref().and_then(Value::as_number) {
                        Some(n) => Value::from(-n).into(),
                        None => Converted::Default,
                    })
                } else {
                    binding.clear_converter()
                };
                result.map(|_| ())
            }
            Op::Unbind => {
                binding.unbind();
                Ok(())
            }
            Op::Bind => binding.bind().map(|_| ()),
        };

        assert!(guard.is_empty(), "sync marks leaked");

        if !binding.is_bound() || binding.is_two_way() {
            continue;
        }

        // walk the path by hand
        let mut current = Some(nodes[0].clone());
        for _ in 0..depth {
            current = current
                .and_then(|n| n.get(&next).ok())
                .and_then(|v| v.as_object().cloned())
                .filter(|n| !n.ptr_eq(&target));
        }
        let expected = match current {
            Some(leaf) => {
                let v = leaf.get(&value).unwrap_or(Value::Null);
                match (negated, v.as_number()) {
                    (true, Some(n)) => Value::from(-n),
                    _ => v,
                }
            }
            None => Value::from(0),
        };
        let actual = target.get(&value).unwrap_or(Value::Null);
        assert!(
            !has_change(&expected, &actual),
            "target {actual:?} does not mirror path value {expected:?}"
        );
    }
});
