/// Runs `func` exactly once: on `release`, or on drop if it was never released.
pub struct DropRelease<F: FnOnce()> {
    func: Option<F>,
}

impl<F: FnOnce()> DropRelease<F> {
    pub fn new(func: F) -> Self {
        DropRelease { func: Some(func) }
    }

    pub fn release(&mut self) {
        if let Some(func) = self.func.take() {
            func();
        }
    }

    pub fn is_released(&self) -> bool {
        self.func.is_none()
    }
}

impl<F: FnOnce()> Drop for DropRelease<F> {
    fn drop(&mut self) {
        self.release();
    }
}
