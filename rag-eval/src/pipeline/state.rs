use state_machines::state_machine;

state_machine! {
    name: RunMachine,
    state: RunState,
    initial: Ready,
    states: [Ready, ResourcesLoaded, QuestionsAnswered, Scored, Completed, Failed],
    events {
        load_resources { transition: { from: Ready, to: ResourcesLoaded } }
        answer_questions { transition: { from: ResourcesLoaded, to: QuestionsAnswered } }
        score { transition: { from: QuestionsAnswered, to: Scored } }
        finalize { transition: { from: Scored, to: Completed } }
        abort {
            transition: { from: Ready, to: Failed }
            transition: { from: ResourcesLoaded, to: Failed }
            transition: { from: QuestionsAnswered, to: Failed }
            transition: { from: Scored, to: Failed }
            transition: { from: Completed, to: Failed }
        }
    }
}

pub fn ready() -> RunMachine<(), Ready> {
    RunMachine::new(())
}
