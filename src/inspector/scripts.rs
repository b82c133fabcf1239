//! Probe expressions evaluated inside the monitored runtime.
//!
//! Each one is self-contained and returns a plain JSON value. Built-in
//! modules are loaded through `process.getBuiltinModule` where present,
//! falling back to the CommonJS `require` of the main module.

/// Measures the drift of a 1ms timer. Resolves to milliseconds, >= 0.
pub const EVENT_LOOP_LAG: &str = r#"
new Promise((resolve) => {
  const start = process.hrtime.bigint();
  const expected = 1;
  setTimeout(() => {
    const actual = Number(process.hrtime.bigint() - start) / 1e6;
    resolve(Math.max(0, actual - expected));
  }, expected);
})
"#;

pub const MEMORY_USAGE: &str = r#"
(() => {
  const m = process.memoryUsage();
  return { heapTotal: m.heapTotal, heapUsed: m.heapUsed, external: m.external };
})()
"#;

pub const THREAD_POOL: &str = r#"
(() => {
  const poolSize = Number(process.env.UV_THREADPOOL_SIZE) || 4;
  const active = typeof process._getActiveRequests === 'function'
    ? process._getActiveRequests().length
    : 0;
  const queued = Math.max(0, active - poolSize);
  return { queueSize: queued, poolSize, activeCount: Math.min(active, poolSize), pendingCount: queued };
})()
"#;

/// Installs a `gc` PerformanceObserver on first use and drains what it has
/// seen since the previous call.
pub const GC_ACTIVITY: &str = r#"
(() => {
  const load = (name) =>
    (typeof process.getBuiltinModule === 'function' && process.getBuiltinModule(name)) ||
    (typeof require === 'function' && require(name)) ||
    (process.mainModule && process.mainModule.require(name));
  const v8 = load('v8');
  const perf = load('perf_hooks');
  if (!v8 || !perf) throw new Error('v8/perf_hooks unavailable');
  const heapUsed = () => v8.getHeapStatistics().used_heap_size;
  let state = globalThis.__stackpulseGc;
  if (!state) {
    state = globalThis.__stackpulseGc = {
      count: 0, longest: 0, totalCount: 0, totalDuration: 0,
      kind: 'unknown', reason: 'unknown', lastHeap: heapUsed(),
    };
    const kinds = { 1: 'minor', 2: 'major', 4: 'incremental', 8: 'weakcb' };
    const obs = new perf.PerformanceObserver((list) => {
      for (const e of list.getEntries()) {
        const d = e.detail || {};
        const kind = d.kind !== undefined ? d.kind : e.kind;
        const flags = d.flags !== undefined ? d.flags : e.flags;
        state.count += 1;
        state.totalCount += 1;
        state.longest = Math.max(state.longest, e.duration);
        state.totalDuration += e.duration;
        state.kind = kinds[kind] || 'unknown';
        state.reason = (flags & 4) ? 'forced' : 'allocation_limit';
      }
    });
    obs.observe({ entryTypes: ['gc'] });
    if (typeof obs.unref === 'function') obs.unref();
  }
  const after = heapUsed();
  const out = {
    collections: state.count, duration: state.longest,
    heapSizeBefore: state.lastHeap, heapSizeAfter: after,
    type: state.kind, reason: state.reason,
    collectionsTotal: state.totalCount, durationTotal: state.totalDuration,
  };
  state.count = 0;
  state.longest = 0;
  state.lastHeap = after;
  return out;
})()
"#;

pub const HANDLES: &str = r#"
(() => {
  const out = { active: 0, refs: 0, timers: 0, tcpSockets: 0, udpSockets: 0, files: 0 };
  const handles = typeof process._getActiveHandles === 'function' ? process._getActiveHandles() : [];
  for (const h of handles) {
    if (!h || typeof h.hasRef !== 'function' || h.hasRef()) out.refs += 1;
  }
  if (typeof process.getActiveResourcesInfo === 'function') {
    const res = process.getActiveResourcesInfo();
    out.active = res.length;
    for (const r of res) {
      if (r === 'Timeout' || r === 'Immediate') out.timers += 1;
      else if (r.startsWith('TCP') || r === 'PipeWrap') out.tcpSockets += 1;
      else if (r.startsWith('UDP')) out.udpSockets += 1;
      else if (r.startsWith('FS') || r === 'FileHandle' || r === 'StatWatcher') out.files += 1;
    }
  } else {
    out.active = handles.length;
    for (const h of handles) {
      const n = h && h.constructor ? h.constructor.name : '';
      if (n === 'Timeout' || n === 'Timer') out.timers += 1;
      else if (n === 'Socket' || n === 'Server') out.tcpSockets += 1;
      else if (n === 'UDP') out.udpSockets += 1;
      else if (n === 'FSWatcher' || n === 'WriteStream' || n === 'ReadStream') out.files += 1;
    }
  }
  return out;
})()
"#;

pub const HEAP_SPACES: &str = r#"
(() => {
  const v8 = (typeof process.getBuiltinModule === 'function' && process.getBuiltinModule('v8')) ||
    (typeof require === 'function' && require('v8')) ||
    (process.mainModule && process.mainModule.require('v8'));
  if (!v8) throw new Error('v8 unavailable');
  const spaces = {};
  for (const s of v8.getHeapSpaceStatistics()) {
    spaces[s.space_name] = { used: s.space_used_size, size: s.space_size, available: s.space_available_size };
  }
  const stats = v8.getHeapStatistics();
  return { spaces, mallocedMemory: stats.malloced_memory, peakMallocedMemory: stats.peak_malloced_memory };
})()
"#;
