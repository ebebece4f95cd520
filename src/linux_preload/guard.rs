use std::cell::Cell;

thread_local! {
    static IN_LAYER: Cell<bool> = const { Cell::new(false) };
}

/// Marks the current thread as running inside the interception layer.
///
/// Hooked calls made while a guard is alive (the layer's own file I/O,
/// logging, DNS lookups) must go straight to the real implementation.
pub struct LayerGuard {
    _not_send: std::marker::PhantomData<*const ()>,
}

impl LayerGuard {
    /// `None` when the thread is already inside the layer, or when its
    /// thread-local storage is being torn down.
    pub fn enter() -> Option<Self> {
        let entered = IN_LAYER
            .try_with(|flag| {
                if flag.get() {
                    false
                } else {
                    flag.set(true);
                    true
                }
            })
            .unwrap_or(false);
        entered.then(|| LayerGuard {
            _not_send: std::marker::PhantomData,
        })
    }
}

impl Drop for LayerGuard {
    fn drop(&mut self) {
        let _ = IN_LAYER.try_with(|flag| flag.set(false));
    }
}
