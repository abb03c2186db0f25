//! Closed lookup tables
//!
//! Every lookup table in the pipeline has fixed contents that are seeded once
//! and never change at runtime, so each one is a plain Rust enum. The stored
//! label is the string written to the database; parsing an unknown label is a
//! [`MalformedField`] error.

use crate::error::MalformedField;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

macro_rules! lookup {
    (@description) => { "" };
    (@description $text:literal) => { $text };
    (
        $(#[$meta:meta])*
        $name:ident in $table:literal {
            $($variant:ident => $label:literal $(: $description:literal)?,)+
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub enum $name {
            $($variant,)+
        }

        impl $name {
            /// Every member, in lookup-table order
            pub const ALL: &'static [$name] = &[$($name::$variant,)+];

            /// Name of the backing lookup table
            pub const TABLE: &'static str = $table;

            pub fn label(self) -> &'static str {
                match self {
                    $($name::$variant => $label,)+
                }
            }

            pub fn description(self) -> &'static str {
                match self {
                    $($name::$variant => lookup!(@description $($description)?),)+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.label())
            }
        }

        impl FromStr for $name {
            type Err = MalformedField;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($label => Ok($name::$variant),)+
                    other => Err(MalformedField::new(
                        $table,
                        format!("unknown label {:?}", other),
                    )),
                }
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(self.label())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let label = String::deserialize(deserializer)?;
                label.parse().map_err(serde::de::Error::custom)
            }
        }
    };
}

lookup! {
    /// Behavioral task family
    Task in "tasks" {
        AudioDelay => "audio delay": "auditory delayed response task (2AFC)",
        AudioMem => "audio mem": "auditory working memory task",
        S1Stim => "s1 stim": "S1 photostimulation task (2AFC)",
    }
}

lookup! {
    /// Instruction given to the animal on a trial
    TrialInstruction in "trial_instructions" {
        Left => "left",
        Right => "right",
        NonPerforming => "non-performing",
    }
}

lookup! {
    Outcome in "outcomes" {
        Hit => "hit",
        Miss => "miss",
        Ignore => "ignore",
        NonPerforming => "non-performing",
    }
}

lookup! {
    /// Early-lick classification of a trial
    EarlyLick in "early_licks" {
        Early => "early": "early lick during sample and/or delay",
        EarlyPresampleOnly => "early, presample only":
            "early lick in the presample period, after the onset of the scheduled wave but before the sample period",
        NoEarly => "no early",
    }
}

lookup! {
    /// Behavioral event vocabulary for [`TrialEventRow`](super::TrialEventRow)
    TrialEventType in "trial_event_types" {
        Delay => "delay",
        Go => "go",
        Sample => "sample",
        Presample => "presample",
        TrialEnd => "trialend",
    }
}

lookup! {
    /// Cell-type classification of a segmented ROI
    CellType in "cell_types" {
        Pyr => "Pyr": "putative pyramidal neuron",
        Interneuron => "interneuron": "interneuron",
        Pt => "PT": "pyramidal tract neuron",
        It => "IT": "intratelecephalic neuron",
        Fs => "FS": "fast spiking",
        Unknown => "N/A": "unknown",
    }
}

/// One row of the task protocol lookup: a numbered protocol within a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskProtocol {
    pub task: Task,
    pub protocol: i32,
    pub description: &'static str,
}

pub const TASK_PROTOCOLS: &[TaskProtocol] = &[
    TaskProtocol { task: Task::AudioDelay, protocol: 1, description: "high tone vs. low tone" },
    TaskProtocol { task: Task::S1Stim, protocol: 2, description: "mini-distractors" },
    TaskProtocol {
        task: Task::S1Stim,
        protocol: 3,
        description: "full distractors, with 2 distractors (at different times) on some of the left trials",
    },
    TaskProtocol { task: Task::S1Stim, protocol: 4, description: "full distractors" },
    TaskProtocol {
        task: Task::S1Stim,
        protocol: 5,
        description: "mini-distractors, with different levels of the mini-stim during sample period",
    },
    TaskProtocol {
        task: Task::S1Stim,
        protocol: 6,
        description: "full distractors; same as protocol 4 but with a no-chirp trial-type",
    },
    TaskProtocol {
        task: Task::S1Stim,
        protocol: 7,
        description: "mini-distractors and full distractors (only at late delay)",
    },
    TaskProtocol {
        task: Task::S1Stim,
        protocol: 8,
        description: "mini-distractors and full distractors (only at late delay), with different levels of the mini-stim and the full-stim during sample period",
    },
    TaskProtocol {
        task: Task::S1Stim,
        protocol: 9,
        description: "mini-distractors and full distractors (only at late delay), with different levels of the mini-stim and the full-stim during sample period",
    },
];

impl TaskProtocol {
    /// Find the protocol registered for `task` under `protocol`
    pub fn find(task: Task, protocol: i32) -> Option<&'static TaskProtocol> {
        TASK_PROTOCOLS
            .iter()
            .find(|p| p.task == task && p.protocol == protocol)
    }
}
