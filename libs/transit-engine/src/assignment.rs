use transit_api::{Offset, PartitionAssignment, RebalanceListener, TopicPattern};

/// Decides starting offsets when partitions are (re)assigned to a consumer.
///
/// With `start_from_earliest` every partition of the assignment is rewound
/// to [`Offset::Beginning`] in one pass before the list goes back to the
/// transport. Otherwise the assignment is passed through and the transport
/// applies its own default.
#[derive(Debug, Clone)]
pub struct AssignmentPolicy {
    pattern: TopicPattern,
    start_from_earliest: bool,
}

impl AssignmentPolicy {
    pub fn new(pattern: TopicPattern, start_from_earliest: bool) -> Self {
        Self {
            pattern,
            start_from_earliest,
        }
    }

    /// Offsets to hand to the transport's assign call.
    pub fn assign(&self, partitions: Vec<PartitionAssignment>) -> Vec<PartitionAssignment> {
        if !self.start_from_earliest {
            return partitions;
        }
        partitions
            .into_iter()
            .map(|p| PartitionAssignment {
                offset: Offset::Beginning,
                ..p
            })
            .collect()
    }
}

impl RebalanceListener for AssignmentPolicy {
    fn on_assign(&self, partitions: Vec<PartitionAssignment>) -> Vec<PartitionAssignment> {
        let assigned = self.assign(partitions);
        tracing::info!(
            pattern = %self.pattern,
            partitions = assigned.len(),
            from_beginning = self.start_from_earliest,
            "partitions assigned"
        );
        assigned
    }
}
