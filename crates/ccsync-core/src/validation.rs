//! Project validation: uniqueness, reference integrity and acyclicity.

use std::collections::{HashMap, HashSet};

use crate::error::ProjectError;
use crate::project::Channel;

/// Validate a channel list before it becomes a [`Project`](crate::Project).
///
/// This performs:
/// - Empty and duplicate name checks
/// - Requirement reference checks
/// - Cycle detection over `required_channels`
pub fn validate_channels(channels: &[Channel]) -> Result<(), ProjectError> {
    // 1. Names are non-empty and unique
    let mut by_name: HashMap<&str, &Channel> = HashMap::with_capacity(channels.len());
    for channel in channels {
        if channel.name.is_empty() {
            return Err(ProjectError::EmptyChannelName);
        }
        if by_name.insert(channel.name.as_str(), channel).is_some() {
            return Err(ProjectError::DuplicateChannel(channel.name.clone()));
        }
    }

    // 2. Every requirement points at a declared channel
    for channel in channels {
        for required in &channel.required_channels {
            if !by_name.contains_key(required.as_str()) {
                return Err(ProjectError::UnknownRequirement {
                    channel: channel.name.clone(),
                    required: required.clone(),
                });
            }
        }
    }

    // 3. The requirement graph is a DAG
    let mut done: HashSet<&str> = HashSet::new();
    for channel in channels {
        let mut path = Vec::new();
        visit(channel.name.as_str(), &by_name, &mut path, &mut done)?;
    }

    Ok(())
}

/// Depth-first walk; `path` holds the current chain, `done` the fully explored nodes.
fn visit<'a>(
    name: &'a str,
    by_name: &HashMap<&'a str, &'a Channel>,
    path: &mut Vec<&'a str>,
    done: &mut HashSet<&'a str>,
) -> Result<(), ProjectError> {
    if done.contains(name) {
        return Ok(());
    }
    if let Some(pos) = path.iter().position(|n| *n == name) {
        let mut cycle: Vec<String> = path[pos..].iter().map(|n| n.to_string()).collect();
        cycle.push(name.to_string());
        return Err(ProjectError::CyclicDependency(cycle));
    }

    path.push(name);
    if let Some(&channel) = by_name.get(name) {
        for required in &channel.required_channels {
            visit(required.as_str(), by_name, path, done)?;
        }
    }
    path.pop();
    done.insert(name);
    Ok(())
}
