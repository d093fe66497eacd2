//! Signal handling.
//!
//! Handlers do almost nothing: they set the shutdown flag and store a
//! single zero word to the armed DMA channel's control register so output
//! stops immediately. The main loop notices the flag and performs the
//! ordered shutdown. Synchronous fault signals additionally `_exit`, since
//! returning from their handlers would re-execute the faulting instruction.

use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};

static SHUTDOWN: AtomicBool = AtomicBool::new(false);
static DMA_STOP_REGISTER: AtomicUsize = AtomicUsize::new(0);

/// Signals that request an orderly shutdown.
const TERMINATION_SIGNALS: [Signal; 7] = [
    Signal::SIGHUP,
    Signal::SIGINT,
    Signal::SIGQUIT,
    Signal::SIGPIPE,
    Signal::SIGALRM,
    Signal::SIGTERM,
    Signal::SIGABRT,
];

/// Synchronous faults: stop the DMA engine, then exit immediately.
const FAULT_SIGNALS: [Signal; 4] = [
    Signal::SIGILL,
    Signal::SIGFPE,
    Signal::SIGSEGV,
    Signal::SIGBUS,
];

fn stop_dma() {
    let register = DMA_STOP_REGISTER.load(Ordering::SeqCst);
    if register != 0 {
        // SAFETY: the address was installed by arm_dma_stop from a live
        // register mapping that outlives the producer loop; a single
        // aligned volatile store is async-signal-safe.
        unsafe { ptr::write_volatile(register as *mut u32, 0) };
    }
}

extern "C" fn handle_termination(_signal: libc::c_int) {
    SHUTDOWN.store(true, Ordering::SeqCst);
    stop_dma();
}

extern "C" fn handle_fault(_signal: libc::c_int) {
    stop_dma();
    // SAFETY: _exit is async-signal-safe and does not return.
    unsafe { libc::_exit(1) };
}

/// Install handlers for every signal that would otherwise kill the process
/// with the hardware still running.
pub fn install() -> nix::Result<()> {
    let termination = SigAction::new(
        SigHandler::Handler(handle_termination),
        SaFlags::empty(),
        SigSet::empty(),
    );
    for signal in TERMINATION_SIGNALS {
        // SAFETY: the handler only touches atomics and performs one
        // volatile store; no async-signal-unsafe calls.
        unsafe { sigaction(signal, &termination)? };
    }

    let fault = SigAction::new(
        SigHandler::Handler(handle_fault),
        SaFlags::empty(),
        SigSet::empty(),
    );
    for signal in FAULT_SIGNALS {
        // SAFETY: as above; the fault handler ends in _exit.
        unsafe { sigaction(signal, &fault)? };
    }

    Ok(())
}

/// Give the handlers the CS register of the armed DMA channel.
///
/// Call once the channel is configured; before that, handlers only set the
/// flag.
pub fn arm_dma_stop(register: *mut u32) {
    DMA_STOP_REGISTER.store(register as usize, Ordering::SeqCst);
}

/// Whether a termination signal has been received.
pub fn shutdown_requested() -> bool {
    SHUTDOWN.load(Ordering::SeqCst)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_starts_clear_and_latches() {
        assert!(!shutdown_requested());
        handle_termination(libc::SIGTERM);
        assert!(shutdown_requested());
    }
}
