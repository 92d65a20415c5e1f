use std::cell::Cell;

thread_local! {
    static IN_CALLBACK: Cell<bool> = Cell::new(false);
}

/// Check if the current thread is running listener code.
///
/// Threads that may be running a listener must not wait on the threads that deliver events.
pub fn active() -> bool {
    IN_CALLBACK.with(|flag| flag.get())
}

/// Mark the current thread as dedicated to listener delivery.
pub fn mark_thread() {
    IN_CALLBACK.with(|flag| flag.set(true));
}

/// Run a listener invocation with the current thread marked.
pub fn run<F, T>(block: F) -> T
where
    F: FnOnce() -> T,
{
    let previous = IN_CALLBACK.with(|flag| flag.replace(true));
    let result = block();
    IN_CALLBACK.with(|flag| flag.set(previous));
    result
}

#[cfg(test)]
mod tests {
    use super::active;
    use super::run;

    #[test]
    fn marks_only_during_the_call() {
        assert!(!active());
        let inside = run(|| {
            let nested = run(active);
            nested && active()
        });
        assert!(inside);
        assert!(!active());
    }
}
