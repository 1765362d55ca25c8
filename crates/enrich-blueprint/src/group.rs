//! Output grouping.
//!
//! Callbacks whose outputs overlap, directly or through a chain of other
//! callbacks, form one group; each group is registered as a single dispatch
//! callback. Callbacks sharing a `group` label are merged as if they shared
//! an output.
//!
//! Partitioning is a fixed-point pass over groups: merge every later group
//! that intersects the current one, repeat until a pass merges nothing.
//! Quadratic per pass, which is fine at application scale. Groups come out
//! ordered by their lowest member; members keep declaration order.

use enrich_kernel::{
    Callback, CallbackContext, CallbackError, CallbackOptions, Dependency, Outcome, OutputValue,
};
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::Arc;

/// Keys a callback competes for: its output keys plus its group label.
pub fn grouping_keys(callback: &Callback) -> Vec<String> {
    let mut keys = callback.output_keys();
    if let Some(label) = &callback.options.group {
        keys.push(format!("group:{label}"));
    }
    keys
}

/// Partition callback indices so that no two groups share a key.
pub fn partition(keys: &[Vec<String>]) -> Vec<Vec<usize>> {
    let mut groups: Vec<Vec<usize>> = (0..keys.len()).map(|i| vec![i]).collect();
    loop {
        let mut merged_any = false;
        let mut accounted = vec![false; groups.len()];
        let mut next = Vec::with_capacity(groups.len());
        for i in 0..groups.len() {
            if accounted[i] {
                continue;
            }
            accounted[i] = true;
            let mut members = groups[i].clone();
            let mut seen: BTreeSet<&str> = key_set(keys, &members);
            for j in (i + 1)..groups.len() {
                if accounted[j] {
                    continue;
                }
                let other = key_set(keys, &groups[j]);
                if seen.is_disjoint(&other) {
                    continue;
                }
                seen.extend(other);
                members.extend(groups[j].iter().copied());
                accounted[j] = true;
                merged_any = true;
            }
            members.sort_unstable();
            members.dedup();
            next.push(members);
        }
        groups = next;
        if !merged_any {
            return groups;
        }
    }
}

fn key_set<'a>(keys: &'a [Vec<String>], members: &[usize]) -> BTreeSet<&'a str> {
    members
        .iter()
        .flat_map(|&i| keys[i].iter().map(String::as_str))
        .collect()
}

/// Group callbacks and combine each multi-member group into one dispatch
/// callback. Single-member groups pass through unchanged.
pub fn group_callbacks(callbacks: Vec<Callback>) -> Vec<Callback> {
    let keys: Vec<Vec<String>> = callbacks.iter().map(grouping_keys).collect();
    let groups = partition(&keys);
    let mut slots: Vec<Option<Callback>> = callbacks.into_iter().map(Some).collect();
    groups
        .into_iter()
        .map(|group| {
            let members: Vec<Callback> = group.iter().filter_map(|&i| slots[i].take()).collect();
            combine(members)
        })
        .collect()
}

struct Member {
    callback: Callback,
    input_map: Vec<usize>,
    state_map: Vec<usize>,
    output_map: Vec<usize>,
}

/// Union of dependencies in first-seen order, plus per-member index tables.
fn union(lists: &[&[Dependency]]) -> (Vec<Dependency>, Vec<Vec<usize>>) {
    let mut all: Vec<Dependency> = Vec::new();
    let mut keys: Vec<String> = Vec::new();
    let mut maps = Vec::with_capacity(lists.len());
    for list in lists {
        let mut map = Vec::with_capacity(list.len());
        for dependency in *list {
            let key = dependency.key();
            let index = match keys.iter().position(|k| *k == key) {
                Some(index) => {
                    let existing = &mut all[index];
                    existing.options.allow_duplicate |= dependency.options.allow_duplicate;
                    index
                }
                None => {
                    keys.push(key);
                    all.push(dependency.clone());
                    all.len() - 1
                }
            };
            map.push(index);
        }
        maps.push(map);
    }
    (all, maps)
}

/// Merge a group into a single callback.
pub fn combine(mut members: Vec<Callback>) -> Callback {
    if members.len() == 1
        && let Some(single) = members.pop()
    {
        return single;
    }

    let outputs: Vec<&[Dependency]> = members.iter().map(|c| c.outputs.as_slice()).collect();
    let inputs: Vec<&[Dependency]> = members.iter().map(|c| c.inputs.as_slice()).collect();
    let states: Vec<&[Dependency]> = members.iter().map(|c| c.states.as_slice()).collect();
    let (all_outputs, output_maps) = union(&outputs);
    let (all_inputs, input_maps) = union(&inputs);
    let (all_states, state_maps) = union(&states);

    let name = members
        .iter()
        .map(Callback::name)
        .collect::<Vec<_>>()
        .join("+");
    let options = CallbackOptions {
        prevent_initial_call: members.iter().all(|m| m.options.prevent_initial_call),
        group: members.iter().find_map(|m| m.options.group.clone()),
        extra: members
            .iter()
            .flat_map(|m| m.options.extra.clone())
            .collect(),
        ..CallbackOptions::default()
    };
    tracing::debug!(group = %name, outputs = all_outputs.len(), "combining callbacks");

    let members: Vec<Member> = members
        .into_iter()
        .zip(input_maps)
        .zip(state_maps)
        .zip(output_maps)
        .map(|(((callback, input_map), state_map), output_map)| Member {
            callback,
            input_map,
            state_map,
            output_map,
        })
        .collect();
    let members = Arc::new(members);
    let n_inputs = all_inputs.len();
    let n_outputs = all_outputs.len();

    let mut builder = Callback::builder();
    for dependency in all_outputs.into_iter().chain(all_inputs).chain(all_states) {
        builder = builder.dependency(dependency);
    }
    let mut combined = builder.handler(name, move |ctx, args| {
        dispatch(&members, n_inputs, n_outputs, ctx, args)
    });
    combined.options = options;
    combined
}

fn dispatch(
    members: &[Member],
    n_inputs: usize,
    n_outputs: usize,
    ctx: &CallbackContext,
    args: &[Value],
) -> Result<Outcome, CallbackError> {
    let Some(triggered) = &ctx.triggered else {
        return Ok(Outcome::Skipped);
    };
    let (input_values, state_values) = args.split_at(n_inputs.min(args.len()));
    let mut slots = vec![OutputValue::NoUpdate; n_outputs];

    for member in members {
        if !member
            .callback
            .is_triggered_by(&triggered.id, &triggered.property)
        {
            continue;
        }
        let member_args: Vec<Value> = member
            .input_map
            .iter()
            .map(|&i| input_values.get(i).cloned().unwrap_or(Value::Null))
            .chain(
                member
                    .state_map
                    .iter()
                    .map(|&i| state_values.get(i).cloned().unwrap_or(Value::Null)),
            )
            .collect();
        let values = match member.callback.invoke(ctx, &member_args)? {
            Outcome::Skipped => continue,
            Outcome::Updated(values) => values,
        };
        if values.len() != member.output_map.len() {
            return Err(CallbackError::Handler(format!(
                "callback '{}' returned {} values for {} outputs",
                member.callback.name(),
                values.len(),
                member.output_map.len()
            )));
        }
        for (value, &slot) in values.into_iter().zip(&member.output_map) {
            if let OutputValue::Set(value) = value {
                slots[slot] = OutputValue::Set(value);
            }
        }
    }

    if slots.iter().all(OutputValue::is_no_update) {
        return Ok(Outcome::Skipped);
    }
    Ok(Outcome::Updated(slots))
}
