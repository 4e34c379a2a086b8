//! Embedded pages served by the status surface.
//!
//! Placeholders are substituted verbatim; no other templating happens.

pub const CONTENT_PLACEHOLDER: &str = "{{content}}";
pub const VERSION_PLACEHOLDER: &str = "{{FIRMWARE_VERSION}}";

pub const STATUS_PAGE: &[u8] = br#"<!DOCTYPE html>
<html>
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width,initial-scale=1">
<title>Room sensor</title>
<style>
body{font-family:system-ui,sans-serif;background:#eef1f4;color:#222;margin:0;padding:24px}
main{max-width:420px;margin:0 auto;background:#fff;border-radius:8px;padding:20px;box-shadow:0 1px 4px rgba(0,0,0,.12)}
h1{font-size:1.3rem;margin-top:0}
dl{display:grid;grid-template-columns:auto 1fr;gap:6px 14px}
dt{color:#667}
dd{margin:0;font-weight:600}
a.button{display:inline-block;margin-top:16px;padding:8px 14px;background:#2563eb;color:#fff;border-radius:6px;text-decoration:none}
</style>
</head>
<body>
<main>
<h1>Room sensor</h1>
{{content}}
<a class="button" href="/update">Firmware update</a>
</main>
<script>
function refresh(){
  fetch('/data').then(function(r){return r.json();}).then(function(d){
    ['time','temperature','humidity','voltage','uptime'].forEach(function(k){
      var el=document.getElementById(k);
      if(el){el.textContent=d[k];}
    });
  }).catch(function(){});
}
window.addEventListener('load',refresh);
setInterval(refresh,5000);
</script>
</body>
</html>
"#;

pub const UPDATE_PAGE: &[u8] = br#"<!DOCTYPE html>
<html>
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width,initial-scale=1">
<title>Firmware update</title>
<style>
body{font-family:system-ui,sans-serif;background:#eef1f4;color:#222;margin:0;padding:24px}
main{max-width:420px;margin:0 auto;background:#fff;border-radius:8px;padding:20px;box-shadow:0 1px 4px rgba(0,0,0,.12)}
progress{width:100%;margin-top:12px}
#result{margin-top:10px;font-weight:600}
</style>
</head>
<body>
<main>
<h1>Firmware update</h1>
<p>Running version {{FIRMWARE_VERSION}}</p>
<form id="upload">
<input type="file" name="update" accept=".bin" required>
<button type="submit">Upload</button>
</form>
<progress id="progress" max="100" value="0"></progress>
<div id="result"></div>
<a href="/">Back</a>
</main>
<script>
document.getElementById('upload').addEventListener('submit',function(e){
  e.preventDefault();
  var data=new FormData(e.target);
  var xhr=new XMLHttpRequest();
  xhr.upload.onprogress=function(p){
    if(p.lengthComputable){document.getElementById('progress').value=p.loaded*100/p.total;}
  };
  xhr.onload=function(){
    document.getElementById('result').textContent=
      xhr.responseText==='OK'?'Update installed, restarting...':'Update failed';
  };
  xhr.open('POST','/update');
  xhr.send(data);
});
</script>
</body>
</html>
"#;
