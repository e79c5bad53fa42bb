// src/topics.rs - Pub/sub topic table
use std::fmt;

/// Placeholder substituted with the instance identifier before a topic is used.
pub const INSTANCE_TOKEN: &str = "{instance_name}";

/// Delivery guarantee requested for a publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Qos {
    AtMostOnce,
    AtLeastOnce,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Topic {
    /// Retained device-state snapshots.
    PrinterStatus,
    /// Job status broadcast.
    PrintStatus,
    /// Inbound commands for this instance.
    Command,
    /// Responses addressed to the requester of this instance.
    Response,
    /// Broker last-will / presence topic.
    Will,
}

impl Topic {
    pub fn template(&self) -> &'static str {
        match self {
            Topic::PrinterStatus => "c3p/printer/status",
            Topic::PrintStatus => "c3p/print/status",
            Topic::Command => "{instance_name}/c3p/api/request",
            Topic::Response => "{instance_name}/c3p/api/response",
            Topic::Will => "server/will/{instance_name}",
        }
    }

    /// Concrete topic name for the given instance.
    pub fn resolve(&self, instance: &str) -> String {
        resolve_template(self.template(), instance)
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.template())
    }
}

pub fn resolve_template(template: &str, instance: &str) -> String {
    if template.contains(INSTANCE_TOKEN) {
        template.replace(INSTANCE_TOKEN, instance)
    } else {
        template.to_string()
    }
}
