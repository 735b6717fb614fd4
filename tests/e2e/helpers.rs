use std::cell::RefCell;
use std::io::Write;
use std::rc::Rc;

use foxely_core::config::VmConfig;
use foxely_core::vm::{InterpretResult, VM};

/// Writer whose contents stay readable after it is handed to the VM
#[derive(Clone, Default)]
pub struct SharedBuffer(Rc<RefCell<Vec<u8>>>);

impl SharedBuffer {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.0.borrow()).into_owned()
    }

    pub fn clear(&self) {
        self.0.borrow_mut().clear();
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// A VM with captured program output and error output
pub struct Harness {
    pub vm: VM,
    pub out: SharedBuffer,
    pub err: SharedBuffer,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(VmConfig::default())
    }

    pub fn with_config(config: VmConfig) -> Self {
        colored::control::set_override(false);
        let mut vm = VM::new(config);
        let out = SharedBuffer::default();
        let err = SharedBuffer::default();
        vm.set_output(Box::new(out.clone()));
        vm.set_error_output(Box::new(err.clone()));
        Self { vm, out, err }
    }

    pub fn run(&mut self, source: &str) -> InterpretResult {
        self.vm.interpret("main", source)
    }

    /// Run and return everything printed, failing on any error
    pub fn run_ok(&mut self, source: &str) -> String {
        self.out.clear();
        let result = self.run(source);
        assert_eq!(result, InterpretResult::Ok, "stderr:\n{}", self.err.text());
        self.out.text()
    }
}

/// Run source in a fresh VM and return its output
pub fn run_fox(source: &str) -> String {
    Harness::new().run_ok(source)
}

/// Run source expected to fail at runtime and return the error report
pub fn run_fox_err(source: &str) -> String {
    let mut harness = Harness::new();
    let result = harness.run(source);
    assert_eq!(
        result,
        InterpretResult::RuntimeError,
        "expected runtime error, stdout:\n{}",
        harness.out.text()
    );
    harness.err.text()
}

/// First line of an error report: the message itself
pub fn error_message(report: &str) -> &str {
    report.lines().next().unwrap_or_default()
}
