/// Decide and evolve in one step, without persistence.
///
/// Handy for unit tests and for replaying a command against an in-memory
/// aggregate. The persistent path goes through the infra `CommandDispatcher`.
pub fn execute<A>(aggregate: &mut A, command: &A::Command) -> Result<Vec<A::Event>, A::Error>
where
    A: stockloan_core::Aggregate,
{
    let events = A::handle(aggregate, command)?;
    for ev in &events {
        A::apply(aggregate, ev);
    }
    Ok(events)
}
