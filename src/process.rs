//! Scaffolding for building `clap_process` invocations.
//!
//! The tests drive mono, out-of-place processing: one input channel with a
//! generated signal and a separate output channel the plugin writes into.
//! Event queues follow the same boxed-context pattern as the stream adapters.

use std::os::raw::c_void;
use std::ptr;

use clap_sys::audio_buffer::clap_audio_buffer;
use clap_sys::events::{
    clap_event_header, clap_event_param_value, clap_input_events, clap_output_events,
    CLAP_EVENT_PARAM_VALUE,
};
use clap_sys::id::clap_id;
use clap_sys::process::{clap_process, clap_process_status};
use rand::Rng;

use crate::instance::PluginInstance;

/// A pair of mono buffers for one out-of-place processing call.
pub struct AudioBlock {
    input: Vec<f32>,
    output: Vec<f32>,
}

impl AudioBlock {
    /// A linear ramp from -0.5 to 0.5, quiet enough for any effect.
    pub fn ramp(frames: u32) -> Self {
        let input = (0..frames)
            .map(|i| i as f32 / frames as f32 - 0.5)
            .collect();
        Self {
            input,
            output: vec![0.0; frames as usize],
        }
    }

    /// Uniform random samples in [-1, 1].
    pub fn uniform_random(frames: u32, rng: &mut impl Rng) -> Self {
        let input = (0..frames).map(|_| rng.gen_range(-1.0..=1.0)).collect();
        Self {
            input,
            output: vec![0.0; frames as usize],
        }
    }

    pub fn frames(&self) -> u32 {
        self.output.len() as u32
    }

    pub fn output(&self) -> &[f32] {
        &self.output
    }

    /// The index of the first non-finite output sample, if any.
    pub fn first_non_finite_output(&self) -> Option<usize> {
        self.output.iter().position(|sample| !sample.is_finite())
    }
}

/// An input event queue over a list of parameter value events.
pub struct InputEventList {
    raw: clap_input_events,
    events: Vec<clap_event_param_value>,
}

impl InputEventList {
    pub fn empty() -> Box<Self> {
        Self::from_param_values(Vec::new())
    }

    pub fn from_param_values(events: Vec<clap_event_param_value>) -> Box<Self> {
        let mut list = Box::new(Self {
            raw: clap_input_events {
                ctx: ptr::null_mut(),
                size: Some(input_events_size),
                get: Some(input_events_get),
            },
            events,
        });
        list.raw.ctx = &mut *list as *mut Self as *mut c_void;
        list
    }

    pub fn as_raw(&self) -> *const clap_input_events {
        &self.raw
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

unsafe extern "C" fn input_events_size(list: *const clap_input_events) -> u32 {
    let this = &*((*list).ctx as *const InputEventList);
    this.events.len() as u32
}

unsafe extern "C" fn input_events_get(
    list: *const clap_input_events,
    index: u32,
) -> *const clap_event_header {
    let this = &*((*list).ctx as *const InputEventList);
    match this.events.get(index as usize) {
        Some(event) => &event.header,
        None => ptr::null(),
    }
}

/// An output event queue that rejects every push. The conformance tests do
/// not consume plugin output events, and a well-behaved plugin must tolerate
/// a full queue.
pub struct OutputEventSink {
    raw: clap_output_events,
}

impl OutputEventSink {
    pub fn new() -> Self {
        Self {
            raw: clap_output_events {
                ctx: ptr::null_mut(),
                try_push: Some(output_events_try_push),
            },
        }
    }

    pub fn as_raw(&self) -> *const clap_output_events {
        &self.raw
    }
}

impl Default for OutputEventSink {
    fn default() -> Self {
        Self::new()
    }
}

unsafe extern "C" fn output_events_try_push(
    _list: *const clap_output_events,
    _event: *const clap_event_header,
) -> bool {
    false
}

/// Builds a `CLAP_EVENT_PARAM_VALUE` event at time 0. The `space_id` is a
/// parameter so tests can deliberately use a namespace the plugin must
/// ignore.
pub fn param_value_event(
    space_id: u16,
    param_id: clap_id,
    cookie: *mut c_void,
    value: f64,
) -> clap_event_param_value {
    clap_event_param_value {
        header: clap_event_header {
            size: std::mem::size_of::<clap_event_param_value>() as u32,
            time: 0,
            space_id,
            type_: CLAP_EVENT_PARAM_VALUE,
            flags: 0,
        },
        param_id,
        cookie,
        note_id: -1,
        port_index: -1,
        channel: -1,
        key: -1,
        value,
    }
}

/// Runs a single out-of-place processing call over `block`, delivering
/// `in_events` and discarding anything the plugin pushes back.
pub fn process_once(
    plugin: &mut PluginInstance,
    block: &mut AudioBlock,
    in_events: &InputEventList,
    steady_time: i64,
) -> clap_process_status {
    let mut input_ptrs = [block.input.as_mut_ptr()];
    let mut output_ptrs = [block.output.as_mut_ptr()];

    let mut audio_inputs = clap_audio_buffer {
        data32: input_ptrs.as_mut_ptr() as *const *const f32,
        data64: ptr::null_mut(),
        channel_count: 1,
        latency: 0,
        constant_mask: 0,
    };
    let mut audio_outputs = clap_audio_buffer {
        data32: output_ptrs.as_mut_ptr() as *const *const f32,
        data64: ptr::null_mut(),
        channel_count: 1,
        latency: 0,
        constant_mask: 0,
    };

    let out_events = OutputEventSink::new();

    let process_data = clap_process {
        steady_time,
        frames_count: block.frames(),
        transport: ptr::null(),
        audio_inputs: &mut audio_inputs,
        audio_outputs: &mut audio_outputs,
        audio_inputs_count: 1,
        audio_outputs_count: 1,
        in_events: in_events.as_raw(),
        out_events: out_events.as_raw(),
    };

    plugin.process(&process_data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap_sys::events::CLAP_CORE_EVENT_SPACE_ID;

    #[test]
    fn test_ramp_block_is_finite_and_bounded() {
        let block = AudioBlock::ramp(512);
        assert_eq!(block.frames(), 512);
        assert_eq!(block.first_non_finite_output(), None);
        assert!((block.input[0] + 0.5).abs() < 1e-6);
        assert!(block.input.iter().all(|sample| (-0.5..=0.5).contains(sample)));
    }

    #[test]
    fn test_random_block_stays_in_range() {
        let mut rng = rand::thread_rng();
        let block = AudioBlock::uniform_random(256, &mut rng);
        assert!(block.input.iter().all(|sample| (-1.0..=1.0).contains(sample)));
    }

    #[test]
    fn test_input_event_list_abi() {
        let events = vec![
            param_value_event(CLAP_CORE_EVENT_SPACE_ID, 1, std::ptr::null_mut(), 0.25),
            param_value_event(CLAP_CORE_EVENT_SPACE_ID, 2, std::ptr::null_mut(), 0.75),
        ];
        let list = InputEventList::from_param_values(events);
        assert_eq!(list.len(), 2);

        unsafe {
            let raw = list.as_raw();
            assert_eq!(((*raw).size.unwrap())(raw), 2);

            let header = ((*raw).get.unwrap())(raw, 0);
            assert!(!header.is_null());
            assert_eq!((*header).type_, CLAP_EVENT_PARAM_VALUE);
            assert_eq!((*header).space_id, CLAP_CORE_EVENT_SPACE_ID);

            // Out-of-range indices yield null, not garbage.
            assert!(((*raw).get.unwrap())(raw, 2).is_null());
        }
    }

    #[test]
    fn test_empty_event_list() {
        let list = InputEventList::empty();
        assert!(list.is_empty());
        unsafe {
            let raw = list.as_raw();
            assert_eq!(((*raw).size.unwrap())(raw), 0);
            assert!(((*raw).get.unwrap())(raw, 0).is_null());
        }
    }

    #[test]
    fn test_output_sink_rejects_pushes() {
        let sink = OutputEventSink::new();
        let header = clap_event_header {
            size: std::mem::size_of::<clap_event_header>() as u32,
            time: 0,
            space_id: CLAP_CORE_EVENT_SPACE_ID,
            type_: CLAP_EVENT_PARAM_VALUE,
            flags: 0,
        };
        unsafe {
            let raw = sink.as_raw();
            assert!(!((*raw).try_push.unwrap())(raw, &header));
        }
    }

    #[test]
    fn test_wrong_namespace_event_shape() {
        let event = param_value_event(0xB33F, 42, std::ptr::null_mut(), 0.5);
        assert_eq!(event.header.space_id, 0xB33F);
        assert_eq!(event.param_id, 42);
        assert_eq!(event.header.type_, CLAP_EVENT_PARAM_VALUE);
        assert!(event.cookie.is_null());
    }
}
