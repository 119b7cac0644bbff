use std::any::Any;

use metrics_api::{Number, NumberKind};

use super::Aggregator;
use crate::{Aggregation, MetricsError};

const NAME: &str = "multi";

/// Feeds every measurement to several aggregators at once.
///
/// Each member keeps its own state, so one instrument can be exported both as, say, a histogram
/// and a sum.  Combining two `Multi`s is done member by member, and requires both to have the same
/// number of members in the same order.  A member that fails does not stop the others: failures
/// are gathered into a single [`MetricsError::Multiple`].
pub struct Multi {
    kind: NumberKind,
    members: Vec<Box<dyn Aggregator>>,
}

impl Multi {
    /// Creates a new `Multi` over the given members, which should all store `kind`.
    pub fn new(kind: NumberKind, members: Vec<Box<dyn Aggregator>>) -> Self {
        Multi { kind, members }
    }

    /// Number of members.
    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    /// Gets the member at `index`.
    pub fn get(&self, index: usize) -> Option<&dyn Aggregator> {
        self.members.get(index).map(AsRef::as_ref)
    }

    fn downcast<'a>(&self, other: &'a dyn Aggregator) -> Result<&'a Multi, MetricsError> {
        let other = other
            .as_any()
            .downcast_ref::<Multi>()
            .ok_or(MetricsError::InconsistentAggregator { expected: NAME, found: other.name() })?;
        if other.members.len() != self.members.len() {
            return Err(MetricsError::InconsistentConfig(NAME));
        }
        Ok(other)
    }

    fn pairwise<F>(&self, other: &Multi, mut op: F) -> Result<(), MetricsError>
    where
        F: FnMut(&dyn Aggregator, &dyn Aggregator) -> Result<(), MetricsError>,
    {
        let errors = self
            .members
            .iter()
            .zip(&other.members)
            .filter_map(|(ours, theirs)| op(ours.as_ref(), theirs.as_ref()).err())
            .collect();
        combine(errors)
    }
}

fn combine(mut errors: Vec<MetricsError>) -> Result<(), MetricsError> {
    match errors.len() {
        0 => Ok(()),
        1 => Err(errors.remove(0)),
        _ => Err(MetricsError::Multiple(errors)),
    }
}

impl Aggregator for Multi {
    fn name(&self) -> &'static str {
        NAME
    }

    fn number_kind(&self) -> NumberKind {
        self.kind
    }

    fn update(&self, number: Number) {
        for member in &self.members {
            member.update(number);
        }
    }

    fn synchronized_move(&self, destination: Option<&dyn Aggregator>) -> Result<(), MetricsError> {
        match destination {
            None => combine(
                self.members.iter().filter_map(|m| m.synchronized_move(None).err()).collect(),
            ),
            Some(destination) => {
                let destination = self.downcast(destination)?;
                self.pairwise(destination, |ours, theirs| ours.synchronized_move(Some(theirs)))
            }
        }
    }

    fn merge(&self, from: &dyn Aggregator) -> Result<(), MetricsError> {
        let from = self.downcast(from)?;
        self.pairwise(from, |ours, theirs| ours.merge(theirs))
    }

    fn subtract(&self, operand: &dyn Aggregator) -> Result<(), MetricsError> {
        let operand = self.downcast(operand)?;
        self.pairwise(operand, |ours, theirs| ours.subtract(theirs))
    }

    /// Members without data are reported as `None`.  When no member has data, the whole
    /// aggregation has none.
    fn aggregation(&self) -> Result<Aggregation, MetricsError> {
        let mut views = Vec::with_capacity(self.members.len());
        let mut errors = Vec::new();
        for member in &self.members {
            match member.aggregation() {
                Ok(view) => views.push(Some(view)),
                Err(MetricsError::NoData) => views.push(None),
                Err(e) => errors.push(e),
            }
        }

        combine(errors)?;
        if views.iter().all(Option::is_none) {
            return Err(MetricsError::NoData);
        }
        Ok(Aggregation::Multiple(views))
    }

    fn is_empty(&self) -> bool {
        self.members.iter().all(|m| m.is_empty())
    }

    fn new_empty(&self) -> Box<dyn Aggregator> {
        Box::new(Multi {
            kind: self.kind,
            members: self.members.iter().map(|m| m.new_empty()).collect(),
        })
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use metrics_api::{Number, NumberKind};
    use quanta::Clock;

    use super::Multi;
    use crate::{
        aggregator::{Aggregator, Histogram, LastValue, StateAggregator, Sum},
        Aggregation, MetricsError,
    };

    fn boxed<A: Aggregator>(aggregator: A) -> Box<dyn Aggregator> {
        Box::new(aggregator)
    }

    fn sum_and_histogram() -> Multi {
        Multi::new(
            NumberKind::I64,
            vec![
                boxed(StateAggregator::<Sum, i64>::new(())),
                boxed(StateAggregator::<Histogram, i64>::new(Arc::from([5.0].as_slice()))),
            ],
        )
    }

    #[test]
    fn updates_reach_every_member() {
        let live = sum_and_histogram();
        let checkpoint = live.new_empty();
        assert_eq!(live.member_count(), 2);
        assert!(live.is_empty());

        for value in [1_i64, 6, 9] {
            live.update(Number::I64(value));
        }
        live.synchronized_move(Some(checkpoint.as_ref())).unwrap();
        assert!(live.is_empty());
        assert!(!checkpoint.is_empty());

        let Ok(Aggregation::Multiple(views)) = checkpoint.aggregation() else {
            panic!("expected multiple aggregations");
        };
        assert_eq!(views[0], Some(Aggregation::Sum(Number::I64(16))));
        match &views[1] {
            Some(Aggregation::Histogram(point)) => assert_eq!(point.counts, vec![1, 2]),
            other => panic!("unexpected aggregation: {:?}", other),
        }
    }

    #[test]
    fn members_are_combined_pairwise() {
        let a = sum_and_histogram();
        let b = sum_and_histogram();
        a.update(Number::I64(2));
        b.update(Number::I64(3));
        b.update(Number::I64(7));

        a.merge(&b).unwrap();
        assert_eq!(a.get(0).unwrap().aggregation(), Ok(Aggregation::Sum(Number::I64(12))));

        a.subtract(&b).unwrap();
        assert_eq!(a.get(0).unwrap().aggregation(), Ok(Aggregation::Sum(Number::I64(2))));
        match a.get(1).unwrap().aggregation() {
            Ok(Aggregation::Histogram(point)) => assert_eq!(point.count, 1),
            other => panic!("unexpected aggregation: {:?}", other),
        }
    }

    #[test]
    fn member_errors_are_gathered() {
        let clock = Clock::new();
        let multi = || {
            Multi::new(
                NumberKind::I64,
                vec![
                    boxed(StateAggregator::<LastValue, i64>::new(clock.clone())),
                    boxed(StateAggregator::<Sum, i64>::new(())),
                    boxed(StateAggregator::<LastValue, i64>::new(clock.clone())),
                ],
            )
        };
        let a = multi();
        let b = multi();

        // Sums still subtract while both last values refuse.
        b.update(Number::I64(4));
        assert_eq!(
            a.subtract(&b),
            Err(MetricsError::Multiple(vec![
                MetricsError::NoSubtraction("last_value"),
                MetricsError::NoSubtraction("last_value"),
            ]))
        );
        assert_eq!(a.get(1).unwrap().aggregation(), Ok(Aggregation::Sum(Number::I64(-4))));
    }

    #[test]
    fn shape_mismatch_is_rejected() {
        let a = sum_and_histogram();
        let shorter = Multi::new(NumberKind::I64, vec![boxed(StateAggregator::<Sum, i64>::new(()))]);
        let sum = StateAggregator::<Sum, i64>::new(());

        assert_eq!(a.merge(&shorter), Err(MetricsError::InconsistentConfig("multi")));
        assert_eq!(
            a.synchronized_move(Some(&sum)),
            Err(MetricsError::InconsistentAggregator { expected: "multi", found: "sum" })
        );
    }

    #[test]
    fn no_data_only_when_every_member_is_empty() {
        let clock = Clock::new();
        let multi = Multi::new(
            NumberKind::F64,
            vec![
                boxed(StateAggregator::<LastValue, f64>::new(clock.clone())),
                boxed(StateAggregator::<LastValue, f64>::new(clock)),
            ],
        );
        assert_eq!(multi.aggregation(), Err(MetricsError::NoData));

        multi.get(1).unwrap().update(Number::F64(2.5));
        let Ok(Aggregation::Multiple(views)) = multi.aggregation() else {
            panic!("expected multiple aggregations");
        };
        assert_eq!(views[0], None);
        assert!(matches!(&views[1], Some(Aggregation::LastValue(point)) if point.value == Number::F64(2.5)));
    }
}
